//! Slash-command parsing and handling, intercepted before the AI path.
//!
//! Commands are matched against an ordered table; the first match wins, so
//! the more specific `/admin ...` forms can never be shadowed by a later
//! pattern. Unmatched `/`-prefixed text gets the unknown-command hint.

use std::sync::Arc;

use murmur_sessions::SessionStore;
use murmur_users::{PolicyError, PolicyStore};

const UNKNOWN_COMMAND: &str = "Unknown command. Send /help for the command list.";
const PERMISSION_DENIED: &str = "Permission denied. This command is admin-only.";

/// A parsed control command with its captured arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Enable,
    Disable,
    Status,
    Clear,
    /// Trailing text captured verbatim, embedded whitespace included.
    SetPrompt(String),
    AdminList,
    AdminEnable(String),
    AdminDisable(String),
}

type Matcher = fn(&str) -> Option<Command>;

/// Evaluated top to bottom against the trimmed text; first match wins.
const MATCHERS: &[Matcher] = &[
    |t| (t == "/help").then_some(Command::Help),
    |t| (t == "/on").then_some(Command::Enable),
    |t| (t == "/off").then_some(Command::Disable),
    |t| (t == "/status").then_some(Command::Status),
    |t| (t == "/clear").then_some(Command::Clear),
    |t| {
        t.strip_prefix("/prompt ")
            .filter(|rest| !rest.is_empty())
            .map(|rest| Command::SetPrompt(rest.to_string()))
    },
    |t| (t == "/admin list").then_some(Command::AdminList),
    |t| {
        t.strip_prefix("/admin enable ")
            .filter(|rest| !rest.is_empty())
            .map(|id| Command::AdminEnable(id.to_string()))
    },
    |t| {
        t.strip_prefix("/admin disable ")
            .filter(|rest| !rest.is_empty())
            .map(|id| Command::AdminDisable(id.to_string()))
    },
];

/// Routes control text to its handler.
pub struct CommandRouter {
    sessions: Arc<SessionStore>,
    policy: Arc<PolicyStore>,
    admin_id: Option<String>,
}

impl CommandRouter {
    pub fn new(
        sessions: Arc<SessionStore>,
        policy: Arc<PolicyStore>,
        admin_id: Option<String>,
    ) -> Self {
        Self {
            sessions,
            policy,
            admin_id,
        }
    }

    /// True iff the text opens with the control prefix.
    pub fn is_command(text: &str) -> bool {
        text.starts_with('/')
    }

    /// Handle command text.
    ///
    /// `Ok(None)` means "not a command": the message belongs to the AI path.
    /// Every `/`-prefixed message produces a reply, the unknown-command hint
    /// included.
    pub fn handle(&self, user_id: &str, text: &str) -> Result<Option<String>, PolicyError> {
        if !Self::is_command(text) {
            return Ok(None);
        }

        let trimmed = text.trim();
        let command = MATCHERS.iter().find_map(|matcher| matcher(trimmed));

        let reply = match command {
            None => UNKNOWN_COMMAND.to_string(),
            Some(Command::Help) => self.help(user_id),
            Some(Command::Enable) => {
                self.policy.enable(user_id)?;
                "Auto-reply is now on.".to_string()
            }
            Some(Command::Disable) => {
                self.policy.disable(user_id)?;
                "Auto-reply is now off.".to_string()
            }
            Some(Command::Status) => self.status(user_id),
            Some(Command::Clear) => {
                self.sessions.clear(user_id);
                "Conversation history cleared.".to_string()
            }
            Some(Command::SetPrompt(prompt)) => {
                self.policy.set_prompt(user_id, &prompt)?;
                format!("Custom prompt set:\n{prompt}")
            }
            Some(Command::AdminList) => {
                if !self.is_admin(user_id) {
                    PERMISSION_DENIED.to_string()
                } else {
                    self.admin_list()
                }
            }
            Some(Command::AdminEnable(target)) => {
                if !self.is_admin(user_id) {
                    PERMISSION_DENIED.to_string()
                } else {
                    self.policy.enable(&target)?;
                    format!("Auto-reply enabled for user {target}.")
                }
            }
            Some(Command::AdminDisable(target)) => {
                if !self.is_admin(user_id) {
                    PERMISSION_DENIED.to_string()
                } else if self.policy.disable(&target)? {
                    format!("Auto-reply disabled for user {target}.")
                } else {
                    format!("User {target} did not have auto-reply enabled.")
                }
            }
        };

        Ok(Some(reply))
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admin_id.as_deref() == Some(user_id)
    }

    fn help(&self, user_id: &str) -> String {
        let mut text = "Murmur commands:\n\
             /on - enable AI auto-reply\n\
             /off - disable AI auto-reply\n\
             /status - show current status\n\
             /clear - clear conversation history\n\
             /prompt <text> - set a custom system prompt\n\n\
             Any message not starting with / talks to the AI directly."
            .to_string();

        if self.is_admin(user_id) {
            text.push_str(
                "\n\nAdmin commands:\n\
                 /admin list - list all users with auto-reply enabled\n\
                 /admin enable <id> - enable auto-reply for a user\n\
                 /admin disable <id> - disable auto-reply for a user",
            );
        }

        text
    }

    fn status(&self, user_id: &str) -> String {
        let state = if self.policy.is_enabled(user_id) {
            "on"
        } else {
            "off"
        };
        match self.policy.prompt(user_id) {
            Some(prompt) => format!("Auto-reply: {state}\nCurrent prompt: {prompt}"),
            None => format!("Auto-reply: {state}"),
        }
    }

    fn admin_list(&self) -> String {
        let users = self.policy.enabled_users();
        if users.is_empty() {
            "No users currently have auto-reply enabled.".to_string()
        } else {
            format!("Users with auto-reply enabled:\n{}", users.join("\n"))
        }
    }
}
