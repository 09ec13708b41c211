//! CLI tool to check and render pugneum templates.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use pugneum::{LexOptions, Options, ParseOptions};
use tracing_subscriber::EnvFilter;

fn usage() -> ExitCode {
    eprintln!("Usage: pugneum <command> [options] [files...]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  render  Render template(s) to HTML on stdout");
    eprintln!("  check   Check that template(s) compile");
    eprintln!("  tokens  Print the token stream as JSON");
    eprintln!("  ast     Print the parsed tree as JSON");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --basedir <dir>       Root for absolute includes (default: current directory)");
    eprintln!("  --global <name=value> Bind a variable for #{{name}} and mixin arguments");
    eprintln!();
    eprintln!("Set RUST_LOG=pugneum=debug for stage diagnostics.");
    ExitCode::from(2)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pugneum=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Split the arguments after the command into pipeline options and files.
fn parse_args(args: &[String]) -> Result<(Options, Vec<String>), String> {
    let mut options = Options::new();
    let mut basedir = None;
    let mut files = Vec::new();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--basedir" => {
                let dir = args.next().ok_or("--basedir needs a directory")?;
                basedir = Some(PathBuf::from(dir));
            }
            "--global" => {
                let binding = args.next().ok_or("--global needs name=value")?;
                let (name, val) = binding
                    .split_once('=')
                    .ok_or_else(|| format!("--global expects name=value, got {binding:?}"))?;
                options = options.global(name, val);
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {flag}")),
            _ => files.push(arg.clone()),
        }
    }
    if let Some(dir) = basedir.or_else(|| std::env::current_dir().ok()) {
        options = options.basedir(dir);
    }
    Ok((options, files))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn run(command: &str, path: &str, options: &Options) -> Result<(), String> {
    match command {
        "render" => {
            let html = pugneum::render_file(path, options).map_err(|e| e.to_string())?;
            println!("{html}");
            Ok(())
        }
        "check" => {
            let source = fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
            let tree = pugneum::compile(&source, Some(path), options)
                .map_err(|e| e.to_string())?;
            eprintln!("{path}: ok ({} top-level node(s))", tree.nodes.len());
            Ok(())
        }
        "tokens" | "ast" => {
            let source = fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
            let tokens = pugneum::lex(&source, &LexOptions::new().filename(path))
                .map_err(|e| e.to_string())?;
            if command == "tokens" {
                return print_json(&tokens);
            }
            let tree = pugneum::parse(&tokens, &ParseOptions::new().filename(path).src(&source))
                .map_err(|e| e.to_string())?;
            print_json(&tree)
        }
        _ => Err(format!("Unknown command: {command}")),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        return usage();
    }

    let command = args[1].as_str();
    if !matches!(command, "render" | "check" | "tokens" | "ast") {
        eprintln!("Unknown command: {command}");
        return ExitCode::from(2);
    }

    let (options, files) = match parse_args(&args[2..]) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };
    if files.is_empty() {
        eprintln!("Error: no files specified");
        return ExitCode::from(2);
    }

    init_tracing();

    let mut had_error = false;
    for path in &files {
        if let Err(e) = run(command, path, &options) {
            eprintln!("{e}");
            had_error = true;
        }
    }

    if had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn options_and_files() {
        let (options, files) = parse_args(&args(&[
            "--basedir",
            "site",
            "a.pg",
            "--global",
            "title=Hi = there",
            "b.pg",
        ]))
        .expect("valid arguments");
        assert_eq!(files, ["a.pg", "b.pg"]);
        assert_eq!(options.basedir, Some(PathBuf::from("site")));
        assert_eq!(
            options.globals.get("title").map(String::as_str),
            Some("Hi = there")
        );
    }

    #[test]
    fn basedir_defaults_to_current_directory() {
        let (options, _) = parse_args(&args(&["a.pg"])).expect("valid arguments");
        assert_eq!(options.basedir, std::env::current_dir().ok());
    }

    #[test]
    fn absolute_include_renders_from_basedir() {
        let dir = std::env::temp_dir().join(format!("pugneum-cli-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("partials")).expect("create dir");
        std::fs::write(dir.join("partials/nav.pg"), "nav #{title}\n").expect("write");
        std::fs::write(dir.join("index.pg"), "include /partials/nav.pg\n").expect("write");

        let basedir = dir.to_string_lossy().into_owned();
        let (options, files) =
            parse_args(&args(&["--basedir", &basedir, "--global", "title=Home", "index.pg"]))
                .expect("valid arguments");
        let html = pugneum::render_file(dir.join(&files[0]), &options);
        std::fs::remove_dir_all(&dir).expect("clean up");
        assert_eq!(html.expect("render"), "<!DOCTYPE html><nav>Home</nav>");
    }

    #[test]
    fn bad_arguments() {
        assert!(parse_args(&args(&["--basedir"])).is_err());
        assert!(parse_args(&args(&["--global", "novalue"])).is_err());
        assert!(parse_args(&args(&["--verbose", "a.pg"])).is_err());
    }
}
