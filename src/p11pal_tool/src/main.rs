// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate base64;
#[macro_use]
extern crate log;
extern crate serde;
extern crate serde_json;

use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use p11pal::store::{self, ObjectRole};
use p11pal::Store;
use p11pal_common::config::{self, Config};
use p11pal_common::logger::Logger;

const USAGE: &str = r#"PKCS#11 PAL provisioning tool
    Usage:
        p11pal-tool <command> [<global options>] [<command options>]

    Global options:
        --config <path>
            Path to the device config file. Defaults to $P11PAL_CONFIG, or
            ./p11pal.json if that is not set.

        --help
            Show this usage message.

    Commands:

        init
            Write a config file with default settings to the --config path.

        save --label <label> --in <file>
            Store the content of <file> as the object named <label>.

        read --label <label> [--out <file>]
            Read the object named <label>. The payload is written to <file> if given,
            or printed to STDOUT as base64 otherwise.

        list
            Print every recognized object label, with its presence and size, as JSON.

        erase
            Erase every object in the store.

        help
            Show this usage message.
"#;

#[derive(Debug)]
enum Error {
    ConfigError(config::Error),
    IoError(std::io::Error),
    SerdeError(serde_json::Error),
    StoreError(store::Error),
    UsageError(String),
}

impl From<Error> for i32 {
    fn from(other: Error) -> i32 {
        match other {
            Error::UsageError(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConfigError(e) => write!(f, "Config error: {:?}", e),
            Self::IoError(e) => write!(f, "{}", e),
            Self::SerdeError(e) => write!(f, "{}", e),
            Self::StoreError(e) => write!(f, "Object store error: {:?}", e),
            Self::UsageError(s) => write!(f, "Error: {}.\nUse --help for help.", s),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Init,
    Save { label: String, input: PathBuf },
    Read { label: String, output: Option<PathBuf> },
    List,
    Erase,
}

#[derive(Debug, Serialize)]
struct ObjectEntry {
    label: String,
    role: &'static str,
    present: bool,
    size: usize,
    private: bool,
}

fn next_value<I: Iterator<Item = String>>(args: &mut I, option: &str) -> Result<String, Error> {
    args.next()
        .ok_or_else(|| Error::UsageError(format!("missing value for {}", option)))
}

/// Parse the arguments following the command name. Returns the command and the config
/// path, if one was given.
fn parse_command<I: Iterator<Item = String>>(
    cmd: &str,
    mut args: I,
) -> Result<(Command, Option<PathBuf>), Error> {
    let mut config_path = None;
    let mut label = None;
    let mut input = None;
    let mut output = None;

    while let Some(word) = args.next() {
        match word.as_str() {
            "--config" => config_path = Some(PathBuf::from(next_value(&mut args, &word)?)),
            "--label" if cmd == "save" || cmd == "read" => {
                label = Some(next_value(&mut args, &word)?)
            }
            "--in" if cmd == "save" => input = Some(PathBuf::from(next_value(&mut args, &word)?)),
            "--out" if cmd == "read" => {
                output = Some(PathBuf::from(next_value(&mut args, &word)?))
            }
            _ => return Err(Error::UsageError(format!("unexpected argument: {}", word))),
        }
    }

    let missing = |what: &str| Error::UsageError(format!("missing {}", what));
    let command = match cmd {
        "init" => Command::Init,
        "save" => Command::Save {
            label: label.ok_or_else(|| missing("--label"))?,
            input: input.ok_or_else(|| missing("--in"))?,
        },
        "read" => Command::Read {
            label: label.ok_or_else(|| missing("--label"))?,
            output,
        },
        "list" => Command::List,
        "erase" => Command::Erase,
        _ => return Err(Error::UsageError(format!("invalid command: {}", cmd))),
    };
    Ok((command, config_path))
}

fn open_store(config: &Config) -> Result<Store, Error> {
    store::open(config).map_err(Error::StoreError)
}

fn cmd_save(config: &Config, label: &str, input: &PathBuf) -> Result<(), Error> {
    let data = std::fs::read(input).map_err(Error::IoError)?;
    let handle = open_store(config)?
        .save(label.as_bytes(), &data)
        .map_err(Error::StoreError)?;
    info!("Saved {} bytes as {:?} (handle {})", data.len(), label, u64::from(handle));
    Ok(())
}

fn cmd_read<W: Write>(
    config: &Config,
    label: &str,
    output: Option<&PathBuf>,
    out: &mut W,
) -> Result<(), Error> {
    let store = open_store(config)?;
    let handle = store
        .find(label.as_bytes())
        .ok_or(Error::StoreError(store::Error::LabelUnknown))?;
    let value = store.get_value(handle).map_err(Error::StoreError)?;
    let ret = match output {
        Some(path) => std::fs::write(path, value.data()).map_err(Error::IoError),
        None => writeln!(out, "{}", STANDARD.encode(value.data())).map_err(Error::IoError),
    };
    store.release_value(value);
    ret
}

fn cmd_list<W: Write>(config: &Config, out: &mut W) -> Result<(), Error> {
    let store = open_store(config)?;
    let mut entries = Vec::new();
    for role in ObjectRole::ALL.iter() {
        let label = store.labels().label(*role);
        let handle = store
            .find(label)
            .ok_or(Error::StoreError(store::Error::LabelUnknown))?;
        let (present, size) = match store.get_value(handle) {
            Ok(value) => {
                let size = value.len();
                store.release_value(value);
                (true, size)
            }
            Err(store::Error::ObjectAbsent) => (false, 0),
            Err(e) => return Err(Error::StoreError(e)),
        };
        entries.push(ObjectEntry {
            label: String::from_utf8_lossy(label).into_owned(),
            role: role.name(),
            present,
            size,
            private: role.is_private(),
        });
    }
    serde_json::to_writer_pretty(&mut *out, &entries).map_err(Error::SerdeError)?;
    writeln!(out).map_err(Error::IoError)
}

fn cmd_erase(config: &Config) -> Result<(), Error> {
    open_store(config)?.erase_all().map_err(Error::StoreError)?;
    warn!("Erased every object in the store");
    Ok(())
}

fn run<W: Write>(command: &Command, config_path: &PathBuf, out: &mut W) -> Result<(), Error> {
    if *command == Command::Init {
        return Config::default()
            .save(config_path)
            .map_err(Error::ConfigError);
    }

    let config = Config::load_ro(config_path).map_err(Error::ConfigError)?;
    Logger::init(config.log.as_ref());
    debug!("Using config {}", config_path.display());

    match command {
        Command::Init => Ok(()),
        Command::Save { label, input } => cmd_save(&config, label, input),
        Command::Read { label, output } => cmd_read(&config, label, output.as_ref(), out),
        Command::List => cmd_list(&config, out),
        Command::Erase => cmd_erase(&config),
    }
}

fn rusty_main() -> Result<(), Error> {
    let mut args = std::env::args();

    // Skip executable name.
    args.next();

    let cmd = match args.next() {
        Some(cmd) => cmd,
        None => return Err(Error::UsageError("missing command".to_string())),
    };
    match cmd.as_str() {
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            let (command, config_path) = parse_command(cmd.as_str(), args)?;
            let config_path = config_path.unwrap_or_else(Config::default_path);
            run(&command, &config_path, &mut std::io::stdout())
        }
    }
}

fn main() {
    match rusty_main() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(i32::from(e))
        }
    }
}
