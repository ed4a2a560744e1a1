use std::process::Command;

use snafu::{ResultExt, ensure};

use crate::{ExitSnafu, Result, SpawnSnafu};

fn describe(command: &Command) -> String {
    format!("{command:?}")
}

pub async fn run_command(mut command: tokio::process::Command) -> Result<()> {
    let description = describe(command.as_std());
    debug!(message = "Running command.", command = %description);

    let status = command
        .kill_on_drop(true)
        .spawn()
        .context(SpawnSnafu {
            command: description.as_str(),
        })?
        .wait()
        .await
        .context(SpawnSnafu {
            command: description.as_str(),
        })?;
    ensure!(
        status.success(),
        ExitSnafu {
            command: description,
            status
        }
    );
    Ok(())
}

pub fn run_command_blocking(mut command: Command) -> Result<()> {
    let description = describe(&command);
    debug!(message = "Running blocking command.", command = %description);

    let status = command
        .spawn()
        .context(SpawnSnafu {
            command: description.as_str(),
        })?
        .wait()
        .context(SpawnSnafu {
            command: description.as_str(),
        })?;
    ensure!(
        status.success(),
        ExitSnafu {
            command: description,
            status
        }
    );
    Ok(())
}
