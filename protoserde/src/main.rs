//! # Protoserde CLI Entry Point
//!
//! The main executable for the Protoserde tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    `tracing` subscriber (filtered by `RUST_LOG`, `warn` by default).
//! 2. **Configuration**: Reads the JSON configuration file and configures the codec.
//! 3. **Execution**: Decodes, encodes or describes records through `protoserde_core`.
//! 4. **Presentation**: Formats and prints the resulting data or error to standard output/error.

mod cli;
mod formatter;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Parser;
use cli::{Cli, Commands, Target};
use formatter::{FormattedString, GenericError, Message, MessageList};
use protoserde_core::{MessageCodec, ProtobufFileCodec, Role, can_be_auto_configured};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let properties = read_config_or_exit(&args.config);

    match args.command {
        Commands::Check => check(&properties),
        Commands::Decode {
            target,
            input,
            base64,
        } => decode(&properties, &target, input, base64),
        Commands::Encode {
            target,
            body,
            output,
        } => encode(&properties, &target, &body, output),
        Commands::Describe {
            target,
            json_schema,
        } => describe(&properties, &target, json_schema),
        Commands::Messages => {
            let codec = configure_or_exit(&properties);
            println!("{}", FormattedString::from(MessageList(codec.registry())));
        }
    }
}

fn exit_with(message: impl Into<FormattedString>) -> ! {
    eprintln!("{}", message.into());
    process::exit(1);
}

fn read_config_or_exit(path: &Path) -> serde_json::Value {
    let read = || -> anyhow::Result<serde_json::Value> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file '{}'", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Configuration file '{}' is not valid JSON", path.display()))?;
        anyhow::ensure!(
            value.is_object(),
            "Configuration file '{}' must contain a JSON object",
            path.display()
        );
        Ok(value)
    };

    read().unwrap_or_else(|err| exit_with(err))
}

fn configure_or_exit(properties: &serde_json::Value) -> ProtobufFileCodec {
    ProtobufFileCodec::configure(properties).unwrap_or_else(|err| exit_with(err))
}

fn role(target: &Target) -> Role {
    if target.key { Role::Key } else { Role::Value }
}

fn check(properties: &serde_json::Value) {
    if can_be_auto_configured(properties) {
        println!("{}", FormattedString("Protobuf codec is applicable.".to_string()));
    } else {
        exit_with(GenericError(
            "Protobuf codec is not applicable",
            "no schema source configured",
        ));
    }
}

fn decode(
    properties: &serde_json::Value,
    target: &Target,
    input: Option<PathBuf>,
    base64: Option<String>,
) {
    let bytes = match (input, base64) {
        (_, Some(text)) => STANDARD
            .decode(text.trim())
            .unwrap_or_else(|err| exit_with(GenericError("Invalid base64 record", err))),
        (Some(path), None) => std::fs::read(&path)
            .unwrap_or_else(|err| exit_with(GenericError("Failed to read record", err))),
        (None, None) => {
            let mut buf = Vec::new();
            if let Err(err) = std::io::stdin().read_to_end(&mut buf) {
                exit_with(GenericError("Failed to read record from stdin", err));
            }
            buf
        }
    };

    let codec = configure_or_exit(properties);
    let result = codec
        .deserializer(&target.stream, role(target))
        .and_then(|deserializer| deserializer.deserialize(&bytes))
        .unwrap_or_else(|err| exit_with(err));

    println!("{}", FormattedString::from(result));
}

fn encode(properties: &serde_json::Value, target: &Target, body: &str, output: Option<PathBuf>) {
    let codec = configure_or_exit(properties);
    let bytes = codec
        .serializer(&target.stream, role(target))
        .and_then(|serializer| serializer.serialize(body))
        .unwrap_or_else(|err| exit_with(err));

    match output {
        Some(path) => {
            if let Err(err) = std::fs::write(&path, &bytes) {
                exit_with(GenericError("Failed to write record", err));
            }
            tracing::info!(bytes = bytes.len(), path = %path.display(), "Wrote record");
        }
        None => println!("{}", STANDARD.encode(&bytes)),
    }
}

fn describe(properties: &serde_json::Value, target: &Target, json_schema: bool) {
    let codec = configure_or_exit(properties);
    let role = role(target);

    if json_schema {
        match codec.schema(&target.stream, role) {
            Some(description) => println!("{}", FormattedString::from(description.schema)),
            None => exit_with(GenericError(
                "No message type bound",
                format!("{} of stream '{}'", role, target.stream),
            )),
        }
        return;
    }

    let message = codec
        .resolve(&target.stream, role)
        .unwrap_or_else(|err| exit_with(GenericError("Type Lookup Failed", err)));
    println!("{}", FormattedString::from(Message(codec.registry(), message)));
}
