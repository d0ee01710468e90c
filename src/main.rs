// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use concurrency_safe::commands::hash::HashCommand;
use concurrency_safe::commands::hold::HoldCommand;
use concurrency_safe::commands::stock::{StockCommand, StockMode, StockOptions};
use concurrency_safe::config::ConcurrencySafeConfig;
use concurrency_safe::error::{Result, format_error_with_color, get_exit_code};
use concurrency_safe::logging;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "concurrency-safe")]
#[command(author, version, about = "Business-key locking on advisory locks", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory containing concurrency-safe.toml
    #[arg(long, value_name = "DIR", global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Override the default lock wait budget (e.g. "3", "0.5", "250ms", "infinite")
    #[arg(long, value_name = "TIMEOUT", global = true)]
    lock_timeout: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the lock id of each key
    Hash {
        /// Business keys, e.g. "stock:ABC"
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Acquire a key, hold it, then release it
    #[command(long_about = "Acquire a key, hold it, then release it

Blocking a second process on the same key needs backend.kind = \"postgres\".
The default memory backend only coordinates threads inside one process.")]
    Hold {
        /// Business key to lock
        key: String,

        /// How long to keep the lock (e.g. "5", "1.5", "500ms")
        #[arg(long = "for", value_name = "DURATION", default_value = "5")]
        hold_for: String,
    },

    /// Simulate concurrent purchases of one SKU
    #[command(long_about = "Simulate concurrent purchases of one SKU

Every buyer reads the stock, waits --hold-ms, then writes it back minus one.
In unsafe mode buyers race and the shop oversells. In locked mode each
purchase holds the lock for stock:{sku}; buyers that cannot get it in time
are answered with \"busy, try again\".

Examples:
  concurrency-safe stock --sku ABC --quantity 3 --buyers 10 --mode unsafe
  concurrency-safe stock --sku ABC --quantity 3 --buyers 10 --timeout 0.2")]
    Stock {
        /// Product identifier used in the lock key
        #[arg(long)]
        sku: String,

        /// Units on the shelf before the rush
        #[arg(long, default_value_t = 5)]
        quantity: u32,

        /// Number of concurrent buyers
        #[arg(long, default_value_t = 10)]
        buyers: usize,

        /// Whether purchases take the lock
        #[arg(long, value_enum, default_value_t = StockMode::Locked)]
        mode: StockMode,

        /// Time each purchase spends between reading and writing the stock
        #[arg(long, default_value_t = 100)]
        hold_ms: u64,

        /// Lock wait budget for each purchase (defaults to --lock-timeout)
        #[arg(long)]
        timeout: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    let use_color = std::io::stderr().is_terminal();

    let config = match ConcurrencySafeConfig::load(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_with_color(&e, use_color));
            std::process::exit(get_exit_code(&e));
        }
    };

    let lock_timeout = cli.lock_timeout.as_deref();

    let result: Result<()> = (|| match cli.command {
        Commands::Hash { keys } => {
            let command = HashCommand::new()?;
            command.execute(&keys)
        }
        Commands::Hold { key, hold_for } => {
            let command = HoldCommand::new(&config, lock_timeout)?;
            command.execute(&key, &hold_for)
        }
        Commands::Stock {
            sku,
            quantity,
            buyers,
            mode,
            hold_ms,
            timeout,
        } => {
            let command = StockCommand::new(&config, lock_timeout)?;
            command.execute(&StockOptions {
                sku,
                quantity,
                buyers,
                mode,
                hold: Duration::from_millis(hold_ms),
                timeout,
            })
        }
    })();

    if let Err(e) = result {
        eprintln!("{}", format_error_with_color(&e, use_color));
        std::process::exit(get_exit_code(&e));
    }
}
