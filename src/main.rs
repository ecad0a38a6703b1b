//! VEIL - Interactive Shell
//! A small REPL over a typed store with `String` keys and values.
//!
//! Usage: `veil [DATA_DIR]` (defaults to `./data`). New stores are
//! created with value obfuscation enabled.

use std::io::{self, BufRead, Write};

use veil::{Config, Store};

fn main() {
    env_logger::init();

    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "./data".to_string());

    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║              VEIL Store Shell             ║");
    println!("  ║   Typed, obfuscated key-value store v0.1  ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    set <key> <value>  - Store a key-value pair");
    println!("    get <key>          - Retrieve a value by key");
    println!("    del <key>          - Delete a key");
    println!("    scan [from]        - List pairs, optionally starting at a key");
    println!("    size <from> <to>   - Approximate stored bytes in a key range");
    println!("    compact <from> <to>- Compact a key range");
    println!("    sync               - Make buffered writes durable");
    println!("    info               - Show store statistics");
    println!("    exit               - Close the store");
    println!();

    let config = Config::new(&data_dir).with_obfuscation(true);
    let store = match Store::open(config) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("[ERROR] Failed to open store: {}", err);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("veil> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF
            Ok(_) => {}
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0].to_lowercase().as_str() {
            "set" | "put" => {
                if parts.len() < 3 {
                    println!("  Usage: set <key> <value>");
                    continue;
                }
                let value = parts[2..].join(" ");
                match store.write(parts[1], value.as_str(), false) {
                    Ok(()) => println!("  OK"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "get" => {
                if parts.len() < 2 {
                    println!("  Usage: get <key>");
                    continue;
                }
                match store.read::<_, String>(parts[1]) {
                    Ok(Some(value)) => println!("  \"{}\"", value),
                    Ok(None) => println!("  (nil)"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "del" | "delete" => {
                if parts.len() < 2 {
                    println!("  Usage: del <key>");
                    continue;
                }
                match store.erase(parts[1], false) {
                    Ok(()) => println!("  OK (deleted)"),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "scan" | "list" => {
                if let Err(e) = scan(&store, parts.get(1).copied()) {
                    println!("  ERROR: {}", e);
                }
            }
            "size" => {
                if parts.len() < 3 {
                    println!("  Usage: size <from> <to>");
                    continue;
                }
                match store.estimate_size(parts[1], parts[2]) {
                    Ok(bytes) => println!("  ~{} bytes", bytes),
                    Err(e) => println!("  ERROR: {}", e),
                }
            }
            "compact" => {
                if parts.len() < 3 {
                    println!("  Usage: compact <from> <to>");
                    continue;
                }
                store.compact_range(parts[1], parts[2]);
                println!("  OK");
            }
            "sync" => match store.sync() {
                Ok(()) => println!("  OK (synced)"),
                Err(e) => println!("  ERROR: {}", e),
            },
            "info" | "stats" => {
                println!("  Store:         {}", store.name());
                println!("  Obfuscated:    {}", store.is_obfuscated());
                println!("  Memory usage:  {} bytes", store.memory_usage());
                match store.engine().table_count() {
                    Ok(n) => println!("  Tables:        {}", n),
                    Err(e) => println!("  Tables:        ERROR: {}", e),
                }
                println!();
                for line in store.metrics().report().lines() {
                    println!("  {}", line);
                }
            }
            "exit" | "quit" | "q" => {
                if let Err(e) = store.sync() {
                    eprintln!("[ERROR] Final sync failed: {}", e);
                }
                println!("  Closing VEIL...");
                break;
            }
            _ => {
                println!("  Unknown command: '{}'. Type 'exit' to quit.", parts[0]);
            }
        }
    }
}

fn scan(store: &Store, from: Option<&str>) -> veil::Result<()> {
    let mut it = store.iter()?;
    match from {
        Some(key) => it.seek(key)?,
        None => it.seek_to_first(),
    }

    let mut count = 0;
    while it.valid() {
        match (it.key::<String>(), it.value::<String>()) {
            (Ok(k), Ok(v)) => println!("  {} -> {}", k, v),
            _ => println!("  <{} undecodable bytes>", it.value_size()),
        }
        count += 1;
        it.next();
    }
    it.status()?;

    if count == 0 {
        println!("  (empty)");
    } else {
        println!("  ({} entries)", count);
    }
    Ok(())
}
