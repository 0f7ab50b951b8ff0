use horsec::CompileProject;
use horsec::compiler::compiler_messages::display_messages::print_result_messages;
use horsec::compiler::compiler_messages::warning_config::WARNING_NAMES;
use horsec::compiler::project::uri;
use saying::say;
use std::path::PathBuf;
use std::{env, process};

enum Command {
    Compile(PathBuf),
}

fn print_help(after_error: bool) {
    if after_error {
        println!();
    }
    println!("Usage: horsec compile <file.h64> [options]");
    println!();
    println!("Options:");
    println!("  -Wall                  enable all warnings");
    for name in WARNING_NAMES {
        println!("  -W{name} / -Wno-{name}");
    }
    println!("  --compiler-stage-debug verbose per-stage diagnostics");
    println!("  --import-debug         verbose import resolution");
}

fn get_command(args: &[String]) -> Result<Command, String> {
    match args.first().map(|s| s.as_str()) {
        Some("compile") => {
            let file = args
                .iter()
                .skip(1)
                .find(|a| !a.starts_with('-'))
                .ok_or_else(|| "missing source file for \"compile\"".to_owned())?;
            Ok(Command::Compile(PathBuf::from(file)))
        }
        Some(other) => Err(format!("unknown command \"{other}\"")),
        None => Err("missing command".to_owned()),
    }
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_help(false);
        return;
    }

    let command = match get_command(&args) {
        Ok(command) => command,
        Err(e) => {
            say!(Red { format!("horsec: error: {e}") });
            print_help(true);
            process::exit(2);
        }
    };

    match command {
        Command::Compile(file) => {
            let project_root = match CompileProject::guess_project_root(&file) {
                Ok(root) => root,
                Err(e) => {
                    say!(Red { format!("horsec: error: {e}") });
                    process::exit(1);
                }
            };
            let mut project = match CompileProject::new(&project_root) {
                Ok(project) => project,
                Err(e) => {
                    say!(Red { format!("horsec: error: {e}") });
                    process::exit(1);
                }
            };

            for flag in args.iter().skip(1).filter(|a| a.starts_with('-')) {
                match flag.as_str() {
                    "--compiler-stage-debug" => project.stage_debug = true,
                    "--import-debug" => project.import_debug = true,
                    other => {
                        if !project.warning_config.apply_cli_flag(other) {
                            say!(Red { format!("horsec: error: unknown option \"{other}\"") });
                            print_help(true);
                            process::exit(2);
                        }
                    }
                }
            }

            let absolute = if file.is_absolute() {
                file.clone()
            } else {
                match env::current_dir() {
                    Ok(cwd) => cwd.join(&file),
                    Err(_) => file.clone(),
                }
            };
            let main_uri = match uri::to_file_uri(&absolute.to_string_lossy()) {
                Ok(main_uri) => main_uri,
                Err(e) => {
                    say!(Red { format!("horsec: error: {e}") });
                    process::exit(1);
                }
            };

            let compiled = project.compile(&main_uri);
            print_result_messages(&project.result);
            match compiled {
                Ok(()) => {
                    say!(Green "horsec: compiled without errors");
                }
                Err(()) => {
                    process::exit(1);
                }
            }
        }
    }
}
