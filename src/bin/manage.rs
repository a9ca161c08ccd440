// src/bin/manage.rs

use anyhow::Result;
use cmdtree::{
    Args, CommandDef, ConfigError, Local, Opt, Resume, RetCode, Routine, Step, Steps, Strategy,
};
use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    match management() {
        Ok(definition) => cmdtree::main(definition),
        Err(e) => {
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// `manage [-e ENV] {build,deploy,status}`
fn management() -> Result<CommandDef, ConfigError> {
    CommandDef::local_root("Manage")
        .about("manage deployment")
        .opt(
            Opt::value("env")
                .short('e')
                .long("env")
                .choices(["development", "production"])
                .default("development")
                .help("target environment"),
        )
        .subcommand(build())
        .subcommand(deploy())
        .register(status())
}

fn target_env(args: &Args) -> String {
    args.get_str("env")
        .unwrap_or_else(|| "development".to_string())
}

fn build() -> CommandDef {
    CommandDef::local("Build")
        .about("build app. Installs the requirements of the target environment.")
        .opt(
            Opt::store_true("bundle")
                .long("bundle")
                .help("install into a staging directory and pack it into dist/"),
        )
        .prepare(Routine::full(|_cmd, args, _schema, local| {
            let env = target_env(args);
            let requirements = Path::new("requirements")
                .join(format!("{}.txt", env))
                .display()
                .to_string();

            if args.flag("bundle", false) {
                return bundle(local.clone(), env, requirements);
            }
            Ok(local
                .cmd("pip")
                .args(["install", "-r", requirements.as_str()])
                .into())
        }))
}

/// Installs into a temporary staging directory, then packs it. The directory
/// belongs to the producer and is removed however the sequence ends.
fn bundle(local: Local, env: String, requirements: String) -> Result<Steps> {
    let staging = tempfile::Builder::new()
        .prefix("manage-bundle-")
        .tempdir()?;
    let mut stage = 0;

    Ok(Steps::from_fn(move |resume| {
        let target = staging.path().display().to_string();
        stage += 1;
        match (stage, resume) {
            (_, Resume::Failed(error)) => Err(error.into()),
            (1, _) => Ok(Some(
                local
                    .cmd("pip")
                    .args(["install", "-r", requirements.as_str(), "--target", target.as_str()])
                    .into(),
            )),
            (2, _) => Ok(Some(Step::with(
                Strategy::SHH,
                local.cmd("tar").args([
                    "-czf",
                    format!("dist/app-{}.tar.gz", env).as_str(),
                    "-C",
                    target.as_str(),
                    ".",
                ]),
            ))),
            _ => Ok(None),
        }
    }))
}

fn deploy() -> CommandDef {
    CommandDef::local("Deploy")
        .about("deploy app")
        .opt(
            Opt::store_true("build")
                .long("build")
                .help("run the build command first"),
        )
        .prepare(Routine::full(|cmd, args, _schema, local| {
            if args.flag("build", false) {
                cmd.lookup((-1, "build"))?.call()?;
            }

            let env = target_env(args);
            let local = local.clone();
            let mut checked = false;
            Ok(Steps::from_fn(move |resume| match resume {
                Resume::Start => Ok(Some(Step::with(
                    Strategy::SHH.retcode(RetCode::Any),
                    local.cmd("eb").args(["status", env.as_str()]),
                ))),
                Resume::Completed(outcome) if !checked => {
                    checked = true;
                    // Dry runs report no code; assume the environment is ready.
                    let ready = outcome
                        .result()
                        .is_none_or(|result| result.code.is_none_or(|code| code == 0));
                    if !ready {
                        println!("environment {} is not ready", env.yellow());
                        return Ok(None);
                    }
                    Ok(Some(local.cmd("eb").args(["deploy", env.as_str()]).into()))
                }
                Resume::Failed(error) => Err(error.into()),
                Resume::Completed(_) => Ok(None),
            }))
        }))
}

fn status() -> CommandDef {
    CommandDef::new("Status")
        .about("show the selected environment")
        .run(Routine::args(|cmd, args| {
            let root = cmd.root().map_or("manage", |root| root.name());
            println!("{} targets {}", root, target_env(args).green());
            Ok(())
        }))
}
