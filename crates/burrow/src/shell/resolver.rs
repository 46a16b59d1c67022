//! Command name resolution.
//!
//! Lookup order is fixed: shell-control builtins, then the injected
//! delegate, then the fallback utilities.

use crate::delegate::CommandDelegate;

/// Shell-control primitives. These mutate interpreter state and are never
/// delegated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `:`
    Colon,
    /// `true`
    True,
    /// `false`
    False,
    /// `cd`
    Cd,
    /// `pwd`
    Pwd,
    /// `export`
    Export,
    /// `unset`
    Unset,
    /// `set`
    Set,
    /// `shift`
    Shift,
    /// `test`
    Test,
    /// `[`
    Bracket,
    /// `command`
    Command,
}

impl Builtin {
    /// Look a builtin up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            ":" => Builtin::Colon,
            "true" => Builtin::True,
            "false" => Builtin::False,
            "cd" => Builtin::Cd,
            "pwd" => Builtin::Pwd,
            "export" => Builtin::Export,
            "unset" => Builtin::Unset,
            "set" => Builtin::Set,
            "shift" => Builtin::Shift,
            "test" => Builtin::Test,
            "[" => Builtin::Bracket,
            "command" => Builtin::Command,
            _ => return None,
        })
    }
}

/// Utilities implemented in-process, used when no delegate claims the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utility {
    /// `echo`
    Echo,
    /// `printf`
    Printf,
    /// `cat`
    Cat,
    /// `ls`
    Ls,
    /// `grep`
    Grep,
    /// `rg`
    Rg,
    /// `date`
    Date,
    /// `uname`
    Uname,
    /// `whoami`
    Whoami,
}

impl Utility {
    /// Look a utility up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "echo" => Utility::Echo,
            "printf" => Utility::Printf,
            "cat" => Utility::Cat,
            "ls" => Utility::Ls,
            "grep" => Utility::Grep,
            "rg" => Utility::Rg,
            "date" => Utility::Date,
            "uname" => Utility::Uname,
            "whoami" => Utility::Whoami,
            _ => return None,
        })
    }
}

/// What a command name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// In-process shell builtin
    Builtin(Builtin),
    /// Handled by the command delegate
    Delegated,
    /// Fallback utility
    Utility(Utility),
    /// Nothing provides the name
    NotFound,
}

impl Resolved {
    /// Whether anything provides the name.
    pub fn is_found(self) -> bool {
        self != Resolved::NotFound
    }
}

/// Resolves command names in priority order.
pub struct CommandResolver<'a> {
    delegate: Option<&'a dyn CommandDelegate>,
}

impl std::fmt::Debug for CommandResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandResolver")
            .field("has_delegate", &self.delegate.is_some())
            .finish()
    }
}

impl<'a> CommandResolver<'a> {
    /// Resolver consulting `delegate` after the builtins.
    pub fn new(delegate: Option<&'a dyn CommandDelegate>) -> Self {
        Self { delegate }
    }

    /// Resolve `name`.
    pub async fn resolve(&self, name: &str) -> Resolved {
        if let Some(builtin) = Builtin::from_name(name) {
            return Resolved::Builtin(builtin);
        }
        if let Some(delegate) = self.delegate
            && delegate.has_command(name).await
        {
            return Resolved::Delegated;
        }
        match Utility::from_name(name) {
            Some(utility) => Resolved::Utility(utility),
            None => Resolved::NotFound,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::delegate::{CommandOutput, CommandRequest, DelegateError};

    struct OnlyCat;

    #[async_trait]
    impl CommandDelegate for OnlyCat {
        async fn has_command(&self, name: &str) -> bool {
            matches!(name, "cat" | "cd")
        }

        async fn run(&self, _request: CommandRequest) -> Result<CommandOutput, DelegateError> {
            Ok(CommandOutput::default())
        }
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let delegate = OnlyCat;
        let resolver = CommandResolver::new(Some(&delegate));
        assert_eq!(resolver.resolve("cd").await, Resolved::Builtin(Builtin::Cd));
        assert_eq!(resolver.resolve("cat").await, Resolved::Delegated);
        assert_eq!(resolver.resolve("ls").await, Resolved::Utility(Utility::Ls));
        assert_eq!(resolver.resolve("nope").await, Resolved::NotFound);
    }

    #[tokio::test]
    async fn test_resolution_without_delegate() {
        let resolver = CommandResolver::new(None);
        assert_eq!(resolver.resolve("cat").await, Resolved::Utility(Utility::Cat));
        assert_eq!(
            resolver.resolve("[").await,
            Resolved::Builtin(Builtin::Bracket)
        );
        assert!(!resolver.resolve("python").await.is_found());
    }
}
