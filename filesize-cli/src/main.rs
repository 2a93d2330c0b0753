use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use argbind::mapping::{apply_mapping, parse_mapping, validate_handlers, CommandCatalog};
use argbind::{
    Command, CommandApp, CommandContext, CommandSettings, Configurator, FlagValue, ParamType, ParameterDecl,
    ParameterValidationContext, SettingsType, ValidationResult, Value,
};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::Serialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const EMBEDDED_MAPPING: &str = include_str!("mapping.yaml");

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let code = match build_app() {
        Ok(app) => app.run(std::env::args_os()),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn build_app() -> Result<CommandApp> {
    let mapping = parse_mapping(EMBEDDED_MAPPING)?;
    let catalog = catalog();
    validate_handlers(&mapping, &catalog)?;

    let mut configurator = Configurator::new();
    apply_mapping(&mapping, &catalog, &mut configurator)?;
    configurator.set_application_version(env!("CARGO_PKG_VERSION"));
    Ok(CommandApp::from(configurator.into_configuration()))
}

fn catalog() -> CommandCatalog {
    let mut catalog = CommandCatalog::new();
    catalog
        .register_command("scan", Scan)
        .register_command("largest", Largest)
        .register_command("by_ext", ByExtension)
        .register_settings::<WalkSettings>("walk");
    catalog
}

// =====================
// Settings
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Options shared by every command that walks a directory.
#[derive(Debug, Clone)]
struct WalkSettings {
    path: PathBuf,
    pattern: Option<String>,
    hidden: bool,
    depth: usize,
    output: OutputFormat,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            pattern: None,
            hidden: false,
            depth: 16,
            output: OutputFormat::Human,
        }
    }
}

fn positive_depth(context: &ParameterValidationContext<'_>) -> ValidationResult {
    match context.value.map(Value::get::<usize>) {
        Some(Ok(0)) => ValidationResult::error("--depth must be at least 1"),
        _ => ValidationResult::success(),
    }
}

fn walk_parameters<T: CommandSettings>(builder: argbind::settings::SettingsTypeBuilder<T>) -> argbind::settings::SettingsTypeBuilder<T> {
    builder
        .parameter(ParameterDecl::argument(0, "[PATH]", "path", ParamType::of::<PathBuf>()).description("Directory to scan"))
        .parameter(
            ParameterDecl::option("-p|--pattern <GLOB>", "pattern", ParamType::of::<String>())
                .description("Only count files whose name matches the glob"),
        )
        .parameter(ParameterDecl::option("--hidden", "hidden", ParamType::of::<bool>()).description("Include dot files"))
        .parameter(
            ParameterDecl::option("-d|--depth <N>", "depth", ParamType::of::<usize>())
                .default_value(Value::string("16"))
                .validator(Arc::new(positive_depth)),
        )
        .parameter(
            ParameterDecl::option(
                "-o|--output <FORMAT>",
                "output",
                ParamType::enumeration(&[("human", OutputFormat::Human), ("json", OutputFormat::Json)]),
            )
            .default_value(Value::new(OutputFormat::Human)),
        )
}

fn set_walk(s: &mut WalkSettings, name: &str, value: &Value) -> argbind::Result<bool> {
    match name {
        "path" => s.path = value.get()?,
        "pattern" => s.pattern = Some(value.get()?),
        "hidden" => s.hidden = value.get()?,
        "depth" => s.depth = value.get()?,
        "output" => s.output = value.get()?,
        _ => return Ok(false),
    }
    Ok(true)
}

impl CommandSettings for WalkSettings {
    fn describe() -> Arc<SettingsType> {
        walk_parameters(SettingsType::builder::<WalkSettings>("WalkSettings"))
            .default_factory()
            .setter(|s: &mut WalkSettings, name, value| set_walk(s, name, value).map(|_| ()))
            .build()
    }
}

#[derive(Debug, Clone, Default)]
struct ScanSettings {
    walk: WalkSettings,
    min_size: u64,
}

impl CommandSettings for ScanSettings {
    fn describe() -> Arc<SettingsType> {
        walk_parameters(SettingsType::builder::<ScanSettings>("ScanSettings"))
            .parameter(
                ParameterDecl::option("--min-size <BYTES>", "min_size", ParamType::of::<u64>())
                    .description("Skip files smaller than this")
                    .default_value(Value::new(0u64)),
            )
            .default_factory()
            .setter(|s: &mut ScanSettings, name, value| {
                if !set_walk(&mut s.walk, name, value)? && name == "min_size" {
                    s.min_size = value.get()?;
                }
                Ok(())
            })
            .build()
    }
}

#[derive(Debug, Clone, Default)]
struct LargestSettings {
    walk: WalkSettings,
    top: FlagValue<usize>,
}

impl CommandSettings for LargestSettings {
    fn describe() -> Arc<SettingsType> {
        SettingsType::builder::<LargestSettings>("LargestSettings")
            .inherits(WalkSettings::describe())
            .parameter(
                ParameterDecl::option("-t|--top [N]", "top", ParamType::flag::<usize>())
                    .description("Limit the listing; defaults to the configured count"),
            )
            .default_factory()
            .setter(|s: &mut LargestSettings, name, value| {
                if !set_walk(&mut s.walk, name, value)? && name == "top" {
                    s.top = value.get_flag()?;
                }
                Ok(())
            })
            .build()
    }
}

#[derive(Debug, Clone, Default)]
struct ByExtensionSettings {
    walk: WalkSettings,
    exclude: Vec<String>,
}

impl CommandSettings for ByExtensionSettings {
    fn describe() -> Arc<SettingsType> {
        SettingsType::builder::<ByExtensionSettings>("ByExtensionSettings")
            .inherits(WalkSettings::describe())
            .parameter(
                ParameterDecl::option("-x|--exclude <EXT>", "exclude", ParamType::vec::<String>())
                    .description("Extensions to leave out (repeatable)"),
            )
            .default_factory()
            .setter(|s: &mut ByExtensionSettings, name, value| {
                if !set_walk(&mut s.walk, name, value)? && name == "exclude" {
                    s.exclude = value.get_vec()?;
                }
                Ok(())
            })
            .build()
    }
}

// =====================
// Directory walk
// =====================

#[derive(Debug, Clone, Serialize)]
struct FileEntry {
    path: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Compiles the `--pattern` glob; it is matched against file names only.
fn file_name_matcher(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
    Ok(glob.compile_matcher())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn collect_files(settings: &WalkSettings) -> Result<Vec<FileEntry>> {
    let matcher = settings.pattern.as_deref().map(file_name_matcher).transpose()?;
    let walker = WalkDir::new(&settings.path)
        .max_depth(settings.depth)
        .into_iter()
        .filter_entry(|entry| settings.hidden || !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", settings.path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.as_ref().is_some_and(|m| !m.is_match(entry.file_name())) {
            continue;
        }
        let metadata = entry.metadata()?;
        files.push(FileEntry {
            path: entry.path().display().to_string(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    debug!("Collected {} files below {}", files.len(), settings.path.display());
    Ok(files)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct Report<T: Serialize> {
    command: String,
    generated_at: DateTime<Utc>,
    root: String,
    entries: T,
}

impl<T: Serialize> Report<T> {
    fn new(context: &CommandContext, settings: &WalkSettings, entries: T) -> Self {
        Self {
            command: context.path().join(" "),
            generated_at: Utc::now(),
            root: settings.path.display().to_string(),
            entries,
        }
    }
}

// =====================
// Commands
// =====================

struct Scan;

impl Command for Scan {
    type Settings = ScanSettings;

    fn execute(&self, context: &CommandContext, settings: &ScanSettings) -> Result<i32> {
        let mut files = collect_files(&settings.walk)?;
        files.retain(|f| f.size >= settings.min_size);
        files.sort_by(|a, b| a.path.cmp(&b.path));

        match settings.walk.output {
            OutputFormat::Json => print_json(&Report::new(context, &settings.walk, &files))?,
            OutputFormat::Human => {
                for file in &files {
                    println!("{:>12}  {}", file.size, file.path);
                }
            }
        }
        Ok(0)
    }
}

struct Largest;

impl Largest {
    /// `default_top` from the command's mapping data, if any.
    fn configured_top(context: &CommandContext) -> Option<usize> {
        let data = context.data()?.downcast_ref::<serde_yaml::Value>()?;
        data.get("default_top")?.as_u64().and_then(|n| usize::try_from(n).ok())
    }
}

impl Command for Largest {
    type Settings = LargestSettings;

    fn validate(&self, _context: &CommandContext, settings: &LargestSettings) -> ValidationResult {
        if settings.top.value == Some(0) {
            ValidationResult::error("--top must be at least 1")
        } else {
            ValidationResult::success()
        }
    }

    fn execute(&self, context: &CommandContext, settings: &LargestSettings) -> Result<i32> {
        let mut files = collect_files(&settings.walk)?;
        files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

        if settings.top.is_set {
            let limit = settings
                .top
                .value
                .or_else(|| Self::configured_top(context))
                .unwrap_or(10);
            files.truncate(limit);
        }

        match settings.walk.output {
            OutputFormat::Json => print_json(&Report::new(context, &settings.walk, &files))?,
            OutputFormat::Human => {
                for file in &files {
                    println!("{:>12}  {}", file.size, file.path);
                }
            }
        }
        Ok(0)
    }
}

struct ByExtension;

#[derive(Debug, Default, Serialize)]
struct ExtensionTotal {
    files: usize,
    bytes: u64,
}

fn totals_by_extension(files: &[FileEntry], exclude: &[String]) -> BTreeMap<String, ExtensionTotal> {
    let mut totals: BTreeMap<String, ExtensionTotal> = BTreeMap::new();
    for file in files {
        let ext = Path::new(&file.path)
            .extension()
            .map_or_else(|| "(none)".to_string(), |e| e.to_string_lossy().to_lowercase());
        if exclude.iter().any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(&ext)) {
            continue;
        }
        let total = totals.entry(ext).or_default();
        total.files += 1;
        total.bytes += file.size;
    }
    totals
}

impl Command for ByExtension {
    type Settings = ByExtensionSettings;

    fn execute(&self, context: &CommandContext, settings: &ByExtensionSettings) -> Result<i32> {
        let files = collect_files(&settings.walk)?;
        let totals = totals_by_extension(&files, &settings.exclude);

        match settings.walk.output {
            OutputFormat::Json => print_json(&Report::new(context, &settings.walk, &totals))?,
            OutputFormat::Human => {
                for (ext, total) in &totals {
                    println!("{:>12}  {:>6}  {}", total.bytes, total.files, ext);
                }
            }
        }
        Ok(0)
    }
}
