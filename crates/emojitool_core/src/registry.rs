use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::Serialize;
use walkdir::WalkDir;

use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::store::{
    EmojiRecord, count_records, insert_if_absent, name_exists, open_existing, registered_names,
    unix_timestamp,
};

pub const MAX_NAME_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "gif", "jpg", "jpeg", "webp"];

/// Hand-picked emoji inserted by `seed`: (name, filename, alt text).
pub const DEFAULT_SEED_EMOJIS: &[(&str, &str, &str)] = &[
    ("partyparrot", "partyparrot.gif", "Party Parrot"),
    ("shipit", "shipit.png", "Ship It Squirrel"),
    ("blobheart", "blobheart.png", "Blob Heart"),
    ("rustacean", "rustacean.png", "Rust Crab"),
    ("dumpsterfire", "dumpsterfire.gif", "Dumpster Fire"),
];

#[derive(Debug, Clone, Serialize)]
pub struct AssetFile {
    pub path: PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub found: usize,
    pub added: usize,
    pub skipped: usize,
    pub already_registered: usize,
    pub total: usize,
    pub added_records: Vec<EmojiRecord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (filename, None),
    }
}

/// Filename minus its last extension, cut to 47 chars plus `...` when longer than 50.
pub fn derive_name(filename: &str) -> String {
    let (stem, _) = split_extension(filename);
    if stem.chars().count() <= MAX_NAME_CHARS {
        return stem.to_string();
    }
    let mut name = stem
        .chars()
        .take(MAX_NAME_CHARS - ELLIPSIS.len())
        .collect::<String>();
    name.push_str(ELLIPSIS);
    name
}

pub fn derive_alt_text(name: &str) -> String {
    name.replace(['-', '_'], " ")
}

pub fn mime_type_for(filename: &str) -> &'static str {
    let extension = split_extension(filename)
        .1
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

pub fn is_image_file(filename: &str) -> bool {
    let (stem, extension) = split_extension(filename);
    if stem.is_empty() {
        return false;
    }
    extension.is_some_and(|extension| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    })
}

/// Image files directly inside `emoji_dir`, sorted by file name.
pub fn scan_assets(emoji_dir: &Path) -> Result<Vec<AssetFile>> {
    if !emoji_dir.is_dir() {
        bail!(
            "Emoji directory not found at {}",
            normalize_for_display(emoji_dir)
        );
    }

    let mut assets = Vec::new();
    for entry in WalkDir::new(emoji_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry =
            entry.with_context(|| format!("failed to read {}", emoji_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(filename) = entry.file_name().to_str().map(ToString::to_string) else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        if !is_image_file(&filename) {
            continue;
        }
        assets.push(AssetFile {
            path: entry.into_path(),
            filename,
        });
    }
    Ok(assets)
}

/// Register every image in the emoji directory whose derived name is not taken yet.
pub fn register_assets(paths: &ResolvedPaths, category: &str) -> Result<RegisterReport> {
    if !paths.db_path.is_file() {
        bail!(
            "Database not found at {}",
            normalize_for_display(&paths.db_path)
        );
    }
    let assets = scan_assets(&paths.emoji_dir)?;
    let mut connection = open_existing(&paths.db_path)?;
    register_with_connection(&mut connection, &assets, category, unix_timestamp()?)
}

fn register_with_connection(
    connection: &mut Connection,
    assets: &[AssetFile],
    category: &str,
    added_at: i64,
) -> Result<RegisterReport> {
    let mut taken = registered_names(connection)?;
    let already_registered = taken.len();

    let transaction = connection
        .transaction()
        .context("failed to start register transaction")?;
    let mut skipped = 0usize;
    let mut added_records = Vec::new();
    for asset in assets {
        let name = derive_name(&asset.filename);
        if taken.contains(&name) {
            tracing::debug!(name = %name, filename = %asset.filename, "already registered");
            skipped += 1;
            continue;
        }

        let record = EmojiRecord {
            alt_text: Some(derive_alt_text(&name)),
            name: name.clone(),
            filename: asset.filename.clone(),
            category: category.to_string(),
            added_at,
        };
        if insert_if_absent(&transaction, &record)? {
            tracing::debug!(
                name = %record.name,
                mime = mime_type_for(&record.filename),
                "registered"
            );
            added_records.push(record);
        } else {
            skipped += 1;
        }
        taken.insert(name);
    }
    transaction
        .commit()
        .context("failed to commit register transaction")?;

    let total = count_records(connection)?;
    Ok(RegisterReport {
        found: assets.len(),
        added: added_records.len(),
        skipped,
        already_registered,
        total,
        added_records,
    })
}

/// Add a single emoji unless the name exists. Returns whether it was inserted.
pub fn add_custom_emoji(
    connection: &Connection,
    name: &str,
    filename: &str,
    alt_text: Option<&str>,
    category: &str,
) -> Result<bool> {
    let name = name.trim();
    if name.is_empty() {
        bail!("emoji name cannot be empty");
    }
    if name.chars().count() > MAX_NAME_CHARS {
        bail!("emoji name `{name}` is longer than {MAX_NAME_CHARS} characters");
    }
    if name_exists(connection, name)? {
        tracing::info!(name, "emoji already exists, skipping");
        return Ok(false);
    }

    let record = EmojiRecord {
        name: name.to_string(),
        filename: filename.to_string(),
        alt_text: alt_text.map(ToString::to_string),
        category: category.to_string(),
        added_at: unix_timestamp()?,
    };
    insert_if_absent(connection, &record)
}

pub fn seed_defaults(paths: &ResolvedPaths, category: &str) -> Result<SeedReport> {
    let connection = open_existing(&paths.db_path)?;
    let mut report = SeedReport::default();
    for (name, filename, alt_text) in DEFAULT_SEED_EMOJIS {
        if add_custom_emoji(&connection, name, filename, Some(alt_text), category)? {
            report.added.push((*name).to_string());
        } else {
            report.skipped.push((*name).to_string());
        }
    }
    Ok(report)
}

/// Names that would collide after derivation, for reporting before a run.
pub fn colliding_names(assets: &[AssetFile]) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut collisions = BTreeSet::new();
    for asset in assets {
        let name = derive_name(&asset.filename);
        if !seen.insert(name.clone()) {
            collisions.insert(name);
        }
    }
    collisions
}
