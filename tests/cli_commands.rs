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

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn cli(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("concurrency-safe").unwrap();
    cmd.arg("--config-dir")
        .arg(config_dir.path())
        .env_remove("CONCURRENCY_SAFE_LOCK_TIMEOUT")
        .env_remove("CONCURRENCY_SAFE_DATABASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("hash"))
        .stdout(contains("hold"))
        .stdout(contains("stock"))
        .stdout(contains("--lock-timeout"));
}

#[test]
fn test_hash_prints_lock_ids() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["hash", "stock:ABC", "stock:XYZ"])
        .assert()
        .success()
        .stdout(contains("stock:ABC\t3759596398788825736\t342cc50168a55288"))
        .stdout(contains("stock:XYZ\t-1412125885290519865\t"));
}

#[test]
fn test_hash_requires_a_key() {
    let dir = TempDir::new().unwrap();
    cli(&dir).arg("hash").assert().failure();
}

#[test]
fn test_hold_acquires_and_releases() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["hold", "job:nightly", "--for", "10ms"])
        .assert()
        .success()
        .stdout(contains("Acquired 'job:nightly'"))
        .stdout(contains("Released 'job:nightly'"));
}

#[test]
fn test_hold_help_says_cross_process_blocking_needs_postgres() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["hold", "--help"])
        .assert()
        .success()
        .stdout(contains("backend.kind = \"postgres\""));
}

#[test]
fn test_hold_rejects_infinite_duration() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["hold", "job:nightly", "--for", "infinite"])
        .assert()
        .code(2)
        .stderr(contains("finite duration"));
}

#[test]
fn test_stock_locked_mode_sells_exactly_the_quantity() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args([
            "stock",
            "--sku",
            "ABC",
            "--quantity",
            "2",
            "--buyers",
            "5",
            "--hold-ms",
            "10",
        ])
        .assert()
        .success()
        .stdout(contains("mode: locked"))
        .stdout(contains("sold: 2"))
        .stdout(contains("out of stock: 3"))
        .stdout(contains("final quantity: 0"))
        .stdout(contains("oversold").not());
}

#[test]
fn test_stock_unsafe_mode_oversells() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args([
            "stock",
            "--sku",
            "ABC",
            "--quantity",
            "1",
            "--buyers",
            "6",
            "--hold-ms",
            "200",
            "--mode",
            "unsafe",
        ])
        .assert()
        .success()
        .stdout(contains("mode: unsafe"))
        .stdout(contains("oversold:"));
}

#[test]
fn test_invalid_lock_timeout_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["--lock-timeout", "soon", "hold", "job:nightly", "--for", "1ms"])
        .assert()
        .code(2)
        .stderr(contains("Lock timeout value 'soon' is invalid"));
}

#[test]
fn test_oversized_lock_timeout_is_rejected_not_panicking() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["--lock-timeout", "1e30", "hold", "job:nightly", "--for", "0"])
        .assert()
        .code(2)
        .stderr(contains("Lock timeout value '1e30' is invalid"))
        .stderr(contains("panicked").not());
}

#[test]
fn test_oversized_hold_duration_is_rejected() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["hold", "job:nightly", "--for", "1e30"])
        .assert()
        .code(2)
        .stderr(contains("'1e30' is invalid"));
}

#[test]
fn test_broken_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("concurrency-safe.toml"),
        "[locking]\ntimeout = \"whenever\"\n",
    )
    .unwrap();

    cli(&dir)
        .args(["hash", "stock:ABC"])
        .assert()
        .code(2)
        .stderr(contains("config_error"));
}

#[test]
fn test_postgres_backend_without_url_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("concurrency-safe.toml"),
        "[backend]\nkind = \"postgres\"\n",
    )
    .unwrap();

    cli(&dir)
        .env_remove("DATABASE_URL")
        .args(["hold", "job:nightly", "--for", "1ms"])
        .assert()
        .code(2)
        .stderr(contains("requires backend.url"));
}
