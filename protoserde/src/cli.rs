//! # CLI
//!
//! This module defines the command-line interface of `protoserde` using `clap`.
//!
//! Every command reads the codec configuration from a JSON file (`--config`), using the same
//! keys a host application would provide.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "protoserde",
    version,
    about = "Decode and encode Protobuf broker records as JSON"
)]
pub struct Cli {
    /// Path to the codec configuration (a JSON object)
    #[arg(short, long, global = true, default_value = "protoserde.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether the configuration names any schema source, without loading it
    Check,

    /// Decode a binary record into JSON
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// protoserde -c config.json decode people --input record.bin
    /// protoserde -c config.json decode people --key --base64 CgdNeSBOYW1l
    /// ```
    Decode {
        #[command(flatten)]
        target: Target,

        /// File holding the raw record bytes (stdin when omitted)
        #[arg(long, conflicts_with = "base64")]
        input: Option<PathBuf>,

        /// The record, base64-encoded
        #[arg(long)]
        base64: Option<String>,
    },

    /// Encode a JSON document into a binary record
    ///
    /// Without `--output`, the record is printed base64-encoded.
    Encode {
        #[command(flatten)]
        target: Target,

        /// The JSON document
        #[arg(long)]
        body: String,

        /// Where to write the raw record bytes
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the message type bound to a stream
    Describe {
        #[command(flatten)]
        target: Target,

        /// Print a JSON Schema instead of the message definition
        #[arg(long)]
        json_schema: bool,
    },

    /// List every message type found in the configured schemas
    Messages,
}

#[derive(Args)]
pub struct Target {
    /// Stream (topic) name
    pub stream: String,

    /// Use the type bound to record keys instead of values
    #[arg(long)]
    pub key: bool,
}
