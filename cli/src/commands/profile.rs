use anyhow::Result;
use libsift::run_profiling;
use libsift_profile::{ExternalParser, SdkClasses};

use crate::ProfileArgs;
use crate::commands::path_helpers::collect_files;

const BINARY_EXTS: [&str; 3] = ["apk", "dex", "jar"];

pub(crate) fn command_profile(args: &ProfileArgs) -> Result<()> {
    let binaries = collect_files(&args.files, args.folder.as_deref(), &BINARY_EXTS);
    if binaries.is_empty() {
        log::warn!("no apk/dex/jar binaries found");
        return Ok(());
    }

    let sdk = SdkClasses::builtin();
    let parser = ExternalParser::new(&args.parser);

    run_profiling(&binaries, &args.output, &parser, &sdk, args.overwrite);

    Ok(())
}
