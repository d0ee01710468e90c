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

//! In-process replay of the inventory race.
//!
//! Every buyer reads the remaining quantity, thinks for `hold_ms`, then
//! writes back one less. Without a lock concurrent buyers read the same
//! quantity and the shop oversells; with a lock on `stock:{sku}` each sale
//! sees the previous one.

use crate::config::ConcurrencySafeConfig;
use crate::error::{ConcurrencySafeError, Result};
use crate::locking::{
    ConcurrencySafe, ConflictPolicy, KeyArgs, KeyTemplate, LockCoordinator, parse_timeout_override,
};
use clap::ValueEnum;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

pub const STOCK_KEY_TEMPLATE: &str = "stock:{sku}";
pub const BUSY_MESSAGE: &str = "busy, try again";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StockMode {
    /// Sell without any lock.
    Unsafe,
    /// Guard each sale with a lock on the SKU.
    Locked,
}

impl fmt::Display for StockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockMode::Unsafe => f.write_str("unsafe"),
            StockMode::Locked => f.write_str("locked"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StockOptions {
    pub sku: String,
    pub quantity: u32,
    pub buyers: usize,
    pub mode: StockMode,
    pub hold: Duration,
    pub timeout: Option<String>,
}

/// Result of a single purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sold,
    OutOfStock,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReport {
    pub mode: StockMode,
    pub sku: String,
    pub initial: u32,
    pub sold: usize,
    pub busy: usize,
    pub out_of_stock: usize,
    pub remaining: i64,
}

impl StockReport {
    /// Units sold beyond what the shelf actually had.
    pub fn oversold(&self) -> usize {
        let accounted = i64::from(self.initial) - self.remaining;
        (self.sold as i64 - accounted).max(0) as usize
    }
}

impl fmt::Display for StockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode: {}", self.mode)?;
        writeln!(f, "sku: {}", self.sku)?;
        writeln!(f, "initial quantity: {}", self.initial)?;
        writeln!(f, "sold: {}", self.sold)?;
        writeln!(f, "busy: {}", self.busy)?;
        writeln!(f, "out of stock: {}", self.out_of_stock)?;
        write!(f, "final quantity: {}", self.remaining)?;
        if self.oversold() > 0 {
            write!(f, "\noversold: {}", self.oversold())?;
        }
        Ok(())
    }
}

struct Purchase {
    sku: String,
}

impl KeyArgs for Purchase {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "sku" => Some(self.sku.clone()),
            _ => None,
        }
    }

    fn names(&self) -> Vec<String> {
        vec!["sku".to_string()]
    }
}

/// Shelf shared by every buyer thread.
struct Shelf {
    quantity: AtomicI64,
    hold: Duration,
}

impl Shelf {
    /// Read, think, write. Racy on purpose.
    fn sell_one(&self) -> Outcome {
        let seen = self.quantity.load(Ordering::SeqCst);
        if seen <= 0 {
            return Outcome::OutOfStock;
        }
        thread::sleep(self.hold);
        self.quantity.store(seen - 1, Ordering::SeqCst);
        Outcome::Sold
    }
}

pub struct StockCommand {
    coordinator: LockCoordinator,
}

impl StockCommand {
    pub fn new(config: &ConcurrencySafeConfig, lock_timeout: Option<&str>) -> Result<Self> {
        Ok(Self {
            coordinator: config.build_coordinator(lock_timeout)?,
        })
    }

    pub fn from_coordinator(coordinator: LockCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn execute(&self, options: &StockOptions) -> Result<()> {
        let report = self.simulate(options)?;
        println!("{report}");
        Ok(())
    }

    pub fn simulate(&self, options: &StockOptions) -> Result<StockReport> {
        if options.buyers == 0 {
            return Err(ConcurrencySafeError::InvalidConfig(
                "--buyers must be at least 1".to_string(),
            ));
        }

        let shelf = Arc::new(Shelf {
            quantity: AtomicI64::new(i64::from(options.quantity)),
            hold: options.hold,
        });

        let purchase: Arc<dyn Fn(&Purchase) -> Result<Outcome> + Send + Sync> = match options.mode
        {
            StockMode::Unsafe => {
                let shelf = Arc::clone(&shelf);
                Arc::new(move |_: &Purchase| -> Result<Outcome> { Ok(shelf.sell_one()) })
            }
            StockMode::Locked => {
                let guarded = Arc::new(self.guarded_purchase(&shelf, options)?);
                Arc::new(move |args: &Purchase| {
                    guarded.call(args).map(|outcome| outcome.unwrap_or(Outcome::Busy))
                })
            }
        };

        let sold = Arc::new(AtomicUsize::new(0));
        let busy = Arc::new(AtomicUsize::new(0));
        let out_of_stock = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(options.buyers));

        let handles: Vec<_> = (0..options.buyers)
            .map(|buyer| {
                let purchase = Arc::clone(&purchase);
                let start = Arc::clone(&start);
                let sold = Arc::clone(&sold);
                let busy = Arc::clone(&busy);
                let out_of_stock = Arc::clone(&out_of_stock);
                let args = Purchase {
                    sku: options.sku.clone(),
                };
                thread::spawn(move || -> Result<()> {
                    start.wait();
                    let outcome = purchase(&args)?;
                    debug!("buyer {buyer}: {outcome:?}");
                    let counter = match outcome {
                        Outcome::Sold => &sold,
                        Outcome::Busy => &busy,
                        Outcome::OutOfStock => &out_of_stock,
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().map_err(|_| {
                ConcurrencySafeError::InvalidConfig("a buyer thread panicked".to_string())
            })??;
        }

        Ok(StockReport {
            mode: options.mode,
            sku: options.sku.clone(),
            initial: options.quantity,
            sold: sold.load(Ordering::SeqCst),
            busy: busy.load(Ordering::SeqCst),
            out_of_stock: out_of_stock.load(Ordering::SeqCst),
            remaining: shelf.quantity.load(Ordering::SeqCst),
        })
    }

    fn guarded_purchase(
        &self,
        shelf: &Arc<Shelf>,
        options: &StockOptions,
    ) -> Result<ConcurrencySafe<Purchase, Outcome>> {
        let mut builder = ConcurrencySafe::builder(KeyTemplate::pattern(STOCK_KEY_TEMPLATE)?)
            .on_conflict(ConflictPolicy::handler(|args: &Purchase| {
                debug!("{BUSY_MESSAGE} (sku {})", args.sku);
                Outcome::Busy
            }));
        if let Some(timeout) = options.timeout.as_deref() {
            let timeout = parse_timeout_override(timeout)
                .map_err(|err| ConcurrencySafeError::InvalidConfig(err.to_string()))?;
            builder = builder.timeout(timeout);
        }

        let shelf = Arc::clone(shelf);
        Ok(builder.build_with(&self.coordinator, move |_| shelf.sell_one()))
    }
}
