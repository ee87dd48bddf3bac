use soup::version::{VersionFormat, VersionInfo};

use crate::cli::{VersionCmd, VersionOutput};

pub fn run(cmd: &VersionCmd) -> anyhow::Result<()> {
    let format = match cmd.format {
        VersionOutput::Pretty => VersionFormat::Pretty,
        VersionOutput::Json => VersionFormat::Json,
    };
    println!("{}", VersionInfo::current().render(format)?);
    Ok(())
}
