use std::process::Command;

use super::Result;
use crate::util::{run_command, run_command_blocking};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandToBuild {
    Up,
    Down,
}

pub trait CommandBuilder {
    fn build(&self, command_to_build: CommandToBuild) -> Command;
}

/// Manages commands for bringing up and shutting down resources on the cluster.
///
/// Once [`Manager::up`] has been called the resource is considered live until
/// [`Manager::down`] runs; a live resource is shut down on drop.
#[derive(Debug)]
pub struct Manager<B>
where
    B: CommandBuilder,
{
    command_builder: B,
    needs_drop: bool,
}

impl<B> Manager<B>
where
    B: CommandBuilder,
{
    pub const fn new(command_builder: B) -> Self {
        Self {
            command_builder,
            needs_drop: false,
        }
    }

    /// Bring up the resource.
    ///
    /// The resource counts as live even if the command fails or is
    /// cancelled, since it may have been partially created.
    pub async fn up(&mut self) -> Result<()> {
        self.needs_drop = true;
        self.exec(CommandToBuild::Up).await
    }

    /// Shut down the resource.
    pub async fn down(&mut self) -> Result<()> {
        self.needs_drop = false;
        self.exec(CommandToBuild::Down).await
    }

    pub fn down_blocking(&mut self) -> Result<()> {
        self.needs_drop = false;
        self.exec_blocking(CommandToBuild::Down)
    }

    pub const fn needs_drop(&self) -> bool {
        self.needs_drop
    }

    pub const fn command_builder(&self) -> &B {
        &self.command_builder
    }

    pub const fn command_builder_mut(&mut self) -> &mut B {
        &mut self.command_builder
    }

    async fn exec(&self, command_to_build: CommandToBuild) -> Result<()> {
        let command = self.command_builder.build(command_to_build);
        run_command(tokio::process::Command::from(command)).await
    }

    fn exec_blocking(&self, command_to_build: CommandToBuild) -> Result<()> {
        let command = self.command_builder.build(command_to_build);
        run_command_blocking(command)
    }
}

impl<B> Drop for Manager<B>
where
    B: CommandBuilder,
{
    fn drop(&mut self) {
        if self.needs_drop {
            if let Err(error) = self.down_blocking() {
                error!(message = "Turndown failed.", %error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs `true` or `false` depending on the direction.
    struct Scripted {
        up_succeeds: bool,
    }

    impl CommandBuilder for Scripted {
        fn build(&self, command_to_build: CommandToBuild) -> Command {
            match command_to_build {
                CommandToBuild::Up if !self.up_succeeds => Command::new("false"),
                _ => Command::new("true"),
            }
        }
    }

    #[tokio::test]
    async fn up_then_down() {
        let mut manager = Manager::new(Scripted { up_succeeds: true });
        assert!(!manager.needs_drop());

        manager.up().await.unwrap();
        assert!(manager.needs_drop());

        manager.down().await.unwrap();
        assert!(!manager.needs_drop());
    }

    #[tokio::test]
    async fn failed_up_still_needs_drop() {
        let mut manager = Manager::new(Scripted { up_succeeds: false });
        let error = manager.up().await.unwrap_err();

        assert!(matches!(error, crate::Error::Exit { .. }), "{error}");
        assert!(manager.needs_drop());
    }
}
