//! Subcommand implementations

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use dlcache::{CacheConfig, DiskLruCache};
use tracing::info;

/// Cache location and configuration shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Cache directory
    #[arg(short, long, env = "DLC_DIR", default_value = "./cache")]
    pub dir: PathBuf,

    /// Application version stamped into the journal
    #[arg(long, env = "DLC_APP_VERSION", default_value_t = 1)]
    pub app_version: u32,

    /// Value slots per entry
    #[arg(long, env = "DLC_VALUE_COUNT", default_value_t = 1)]
    pub value_count: usize,

    /// Byte budget
    #[arg(long, env = "DLC_MAX_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_size: u64,
}

impl CacheArgs {
    fn open(&self) -> Result<DiskLruCache> {
        let config = CacheConfig::new(self.app_version, self.value_count, self.max_size);
        DiskLruCache::open_with(&self.dir, config)
            .with_context(|| format!("Failed to open cache at {}", self.dir.display()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Store one value per slot under KEY
    Put {
        key: String,
        /// Values for slots 0, 1, ...; slots not given keep their old value
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Print the value of one slot of KEY
    Get {
        key: String,
        #[arg(short, long, default_value_t = 0)]
        slot: usize,
    },
    /// Remove KEY
    Remove { key: String },
    /// Show size, budget, entry count and journal redundancy
    Stat,
    /// Rewrite the journal without redundant records
    Compact,
    /// Delete the cache directory
    Clear,
}

/// Run `command` against the cache described by `args`, returning the text to print
pub fn run(args: &CacheArgs, command: &Command) -> Result<String> {
    let cache = args.open()?;

    let output = match command {
        Command::Put { key, values } => {
            if values.len() > args.value_count {
                bail!(
                    "{} values given but the cache holds {} per entry",
                    values.len(),
                    args.value_count
                );
            }
            let Some(editor) = cache.edit(key)? else {
                bail!("{} is being edited by another process", key);
            };
            for (slot, value) in values.iter().enumerate() {
                editor.set(slot, value)?;
            }
            editor.commit()?;
            info!(key = %key, "stored");
            "OK".to_string()
        }
        Command::Get { key, slot } => match cache.get(key)? {
            Some(mut snapshot) => snapshot.read_to_string(*slot)?,
            None => "(nil)".to_string(),
        },
        Command::Remove { key } => {
            if cache.remove(key)? {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        Command::Stat => format!(
            "entries: {}\nsize: {}\nmax_size: {}\nvalue_count: {}\nredundant_records: {}",
            cache.len(),
            cache.size(),
            cache.max_size(),
            cache.value_count(),
            cache.stats().redundant_records
        ),
        Command::Compact => {
            cache.compact()?;
            "OK".to_string()
        }
        Command::Clear => {
            cache.delete()?;
            return Ok("OK".to_string());
        }
    };

    cache.close()?;
    Ok(output)
}
