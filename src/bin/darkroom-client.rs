use clap::{Parser, Subcommand};
use darkroom::client::{Client, ClientError};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "darkroom-client")]
#[command(version)]
#[command(about = "Send images to a darkroom server and save what comes back")]
struct Cli {
    /// Server host
    host: String,

    /// Server port
    port: u16,

    /// Seconds to wait for connect, send and reply
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// POST an image with directives and save the processed JPEG
    Post {
        /// Image file to send
        file: PathBuf,

        /// Directives as a JSON object
        #[arg(long, default_value = r#"{"ConvertColorToGray":true}"#)]
        directives: String,

        /// Where to write the processed image
        #[arg(short, long, default_value = "received_gray_image.jpg")]
        output: PathBuf,
    },
    /// GET a path and save the body
    Get {
        /// Request target
        #[arg(default_value = "/")]
        target: String,

        /// Where to write the body
        #[arg(short, long, default_value = "myfile.jpeg")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.host, cli.port).with_timeout(Duration::from_secs(cli.timeout));
    match run(&client, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(client: &Client, command: Command) -> Result<(), String> {
    match command {
        Command::Post {
            file,
            directives,
            output,
        } => {
            let directives = parse_directives(&directives)?;
            let image =
                fs::read(&file).map_err(|e| format!("cannot read {}: {e}", file.display()))?;
            let processed = client
                .post_image(&image, &directives)
                .map_err(|e| describe(&e))?;
            save(&output, &processed)
        }
        Command::Get { target, output } => {
            let body = client.get(&target).map_err(|e| describe(&e))?;
            save(&output, &body)
        }
    }
}

fn parse_directives(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("--directives must be a JSON object".into()),
        Err(e) => Err(format!("--directives is not valid JSON: {e}")),
    }
}

fn describe(err: &ClientError) -> String {
    format!("request failed: {err}")
}

fn save(path: &PathBuf, bytes: &[u8]) -> Result<(), String> {
    fs::write(path, bytes).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    println!("saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
