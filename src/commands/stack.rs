//! `stack build` and `stack rmi`.

use std::path::{Path, PathBuf};

use tracing::info;

use super::Context;
use crate::ValidatedOutput;
use crate::drivers::{BuildOptions, build_and_load};
use crate::stack::{StackConfiguration, StackType};

/// Build the image for a stack.
pub fn build(
    ctx: &Context,
    stack: Option<&str>,
    config_files: &[PathBuf],
    options: &BuildOptions,
) -> ValidatedOutput<()> {
    let stack_path = ctx.resolve_stack(stack);
    if !stack_path.success {
        return stack_path.with_value(());
    }
    let (builder, _) = ctx.drivers();
    info!(stack = %stack_path.value, "building stack");
    build_and_load(builder.as_ref(), options, &stack_path.value, config_files).with_value(())
}

/// Remove the image of each stack for the current tag, or with `all` every
/// image carrying the stack's label.
pub fn remove_images(ctx: &Context, stacks: &[String], all: bool) -> ValidatedOutput<()> {
    let (builder, _) = ctx.drivers();
    let mut result = ValidatedOutput::ok(());
    for stack in stacks {
        let stack_path = ctx.resolve_stack(Some(stack));
        result.absorb(&stack_path);
        if !stack_path.success {
            continue;
        }
        if all {
            result.absorb(&builder.remove_all_images(&stack_path.value));
            continue;
        }
        let configuration = if Path::new(&stack_path.value).is_dir() {
            StackConfiguration::open(&stack_path.value, &[], &ctx.settings.image_tag)
        } else {
            ValidatedOutput::ok(StackConfiguration::new(
                stack_path.value.as_str(),
                StackType::RemoteImage,
                ctx.settings.image_tag.as_str(),
            ))
        };
        result.absorb(&configuration);
        if configuration.success {
            result.absorb(&builder.remove_image(&configuration.value));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::commands::test_support::context;
    use crate::drivers::BuildMode;
    use crate::test_utils::ScriptedExecutor;

    #[test]
    fn test_build_forces_no_cache() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let stack = ctx.settings.stacks_dir.join("fedora");
        fs::create_dir_all(&stack).unwrap();
        fs::write(stack.join("Dockerfile"), "FROM fedora\n").unwrap();
        exec.on("docker images", "{\"ID\":\"img\"}\n");

        let options = BuildOptions {
            mode: BuildMode::NoCache,
            pull: false,
        };
        let out = build(&ctx, Some("fedora"), &[], &options);
        assert!(out.success, "{:?}", out.error);
        let builds = exec.calls_matching("docker build");
        assert_eq!(builds.len(), 1);
        assert!(builds[0].contains("--no-cache"));
    }

    #[test]
    fn test_rmi_all_removes_every_labelled_image() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        exec.on("docker images -q", "aaa\naaa\nbbb\n");
        let out = remove_images(&ctx, &["ubuntu:22.04".into()], true);
        assert!(out.success);
        assert!(exec.calls_matching("docker images -q")[0].contains("label=stack-path=ubuntu:22.04"));
        assert_eq!(exec.calls_matching("docker rmi"), vec!["docker rmi 'aaa' 'bbb'"]);
    }

    #[test]
    fn test_rmi_missing_image_only_warns() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let out = remove_images(&ctx, &["ubuntu:22.04".into()], false);
        assert!(out.success);
        assert_eq!(out.warning.len(), 1);
        assert!(exec.calls_matching("docker rmi").is_empty());
    }
}
