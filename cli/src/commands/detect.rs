use anyhow::{Context, Result};
use libsift::{DetectOptions, Mode, run_detection};
use libsift_profile::SdkClasses;

use crate::DetectArgs;
use crate::commands::path_helpers::collect_files;

pub(crate) fn command_detect(args: &DetectArgs) -> Result<()> {
    let app_profiles = collect_files(&args.app_files, args.app_folder.as_deref(), &["json"]);
    let lib_profiles = collect_files(&args.lib_files, args.lib_folder.as_deref(), &["json"]);

    let opts = DetectOptions {
        mode: if args.scalable {
            Mode::Scalable
        } else {
            Mode::Accurate
        },
        repackage: args.repackage,
        exclude_builtin: !args.builtin,
        ..DetectOptions::default()
    };

    let sdk = SdkClasses::builtin();

    run_detection(
        &app_profiles,
        &lib_profiles,
        &args.output,
        args.overwrite,
        &opts,
        &sdk,
    )
    .context("detection failed")?;

    Ok(())
}
