use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wikimaint_core::autosource::{
    AutoSourceOptions, AutoSourceReport, GradioClassifier, run_auto_source,
};
use wikimaint_core::batch::{
    BatchReport, DEFAULT_DELETE_REASON, DEFAULT_MOVE_REASON, DEFAULT_RATE_REASON, MoveOptions,
    PageListReport, create_redirects, delete_pages, export_page_list, move_pages, rate_pages,
    validate_rating,
};
use wikimaint_core::cleanup::{
    CleanupOptions, CleanupReport, PageResult, Reviewer, run_file_cleanup,
};
use wikimaint_core::config::{WikiConfig, load_config};
use wikimaint_core::diff::{DiffPreview, preview_diff};
use wikimaint_core::download::{DownloadReport, download_files};
use wikimaint_core::lists::{read_csv_rows, read_title_list};
use wikimaint_core::mediawiki::{MediaWikiClient, NS_MAIN, WikiWriteApi};
use wikimaint_core::normalize::classify_and_rewrite;
use wikimaint_core::pagegen::{
    CardOptions, EpisodeOptions, create_card_pages, create_episode_pages, fetch_season_data,
};
use wikimaint_core::rules::NormalizerRules;
use wikimaint_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};

#[derive(Debug, Parser)]
#[command(
    name = "wikimaint",
    version,
    about = "Maintenance bot for MediaWiki file description pages and batch page operations"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    format: OutputFormat,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            format: cli.format,
        }
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    #[command(about = "Classify a local copy of a file description page (no network)")]
    Classify(ClassifyArgs),
    #[command(name = "cleanup-files", about = "Normalize File: description pages")]
    CleanupFiles(CleanupArgs),
    #[command(about = "Fill missing episode sources using the screenshot classifier")]
    Autosource(AutoSourceArgs),
    #[command(about = "Move pages listed as old,new CSV rows")]
    Move(MoveArgs),
    #[command(about = "Delete pages listed in the first CSV column")]
    Delete(DeleteArgs),
    #[command(about = "Create redirects from source,target CSV rows")]
    Redirect(RedirectArgs),
    #[command(about = "Change the article rating of listed pages")]
    Rate(RateArgs),
    #[command(name = "list-pages", about = "Export all page titles to CSV")]
    ListPages(ListPagesArgs),
    #[command(about = "Download original uploads of listed files")]
    Download(DownloadArgs),
    #[command(name = "create-episodes", about = "Create missing episode pages for a season")]
    CreateEpisodes(EpisodeArgs),
    #[command(name = "create-cards", about = "Create missing card pages for a numbered range")]
    CreateCards(CardArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    #[arg(value_name = "PATH", help = "File holding the page wikitext")]
    path: PathBuf,
    #[arg(long, help = "Page title, used for exclusions and the episode reference")]
    title: String,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    #[arg(long, help = "Report proposed edits without saving")]
    dry_run: bool,
    #[arg(long, value_name = "N", help = "Stop after N pages")]
    limit: Option<usize>,
    #[arg(long = "title", value_name = "TITLE", help = "Only check this page (repeatable)")]
    titles: Vec<String>,
    #[arg(long, value_name = "PATH", help = "Only check titles listed in this file")]
    titles_file: Option<PathBuf>,
    #[arg(short, long, help = "Approve every edit without prompting")]
    yes: bool,
}

#[derive(Debug, Args)]
struct AutoSourceArgs {
    #[arg(long, help = "Report proposed edits without saving")]
    dry_run: bool,
    #[arg(long, value_name = "N", help = "Stop after N files")]
    limit: Option<usize>,
    #[arg(short, long, help = "Approve every edit without prompting")]
    yes: bool,
    #[arg(long, value_name = "MS", default_value_t = 1_000, help = "Pause between files")]
    delay_ms: u64,
}

#[derive(Debug, Args)]
struct MoveArgs {
    #[arg(value_name = "CSV")]
    csv: PathBuf,
    #[arg(long, help = "Leave a redirect behind at the old title")]
    keep_redirect: bool,
    #[arg(long, default_value = DEFAULT_MOVE_REASON)]
    reason: String,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(value_name = "CSV")]
    csv: PathBuf,
    #[arg(long, default_value = DEFAULT_DELETE_REASON)]
    reason: String,
}

#[derive(Debug, Args)]
struct RedirectArgs {
    #[arg(value_name = "CSV")]
    csv: PathBuf,
}

#[derive(Debug, Args)]
struct RateArgs {
    #[arg(value_name = "LIST", help = "Text file with one title per line")]
    list: PathBuf,
    #[arg(long, value_name = "CODE", help = "One of UR/ST/UF/FN/CD/LS/GR")]
    rating: String,
    #[arg(long, default_value = DEFAULT_RATE_REASON)]
    reason: String,
}

#[derive(Debug, Args)]
struct ListPagesArgs {
    #[arg(long = "namespace", value_name = "ID", default_values_t = [NS_MAIN])]
    namespaces: Vec<i32>,
    #[arg(long, value_name = "PATH", help = "Defaults to <state>/exports/pages.csv")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    #[arg(value_name = "LIST", help = "Text file with one file name per line")]
    list: PathBuf,
    #[arg(long, value_name = "PATH", help = "Defaults to <state>/downloads")]
    dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EpisodeArgs {
    #[arg(long, value_name = "NAME", help = "Season page name")]
    season: String,
    #[arg(long, value_name = "ABBR", help = "Season abbreviation used by templates")]
    abbr: String,
    #[arg(long, help = "Add {{Conjectural}} after {{Stub}}")]
    conjectural: bool,
    #[arg(long, help = "Add a Watch section")]
    watch: bool,
    #[arg(long, value_name = "URL", help = "Override the season data URL")]
    data_url: Option<String>,
}

#[derive(Debug, Args)]
struct CardArgs {
    #[arg(long)]
    rarity: String,
    #[arg(long, value_name = "MONTH YEAR")]
    release: String,
    #[arg(long, default_value = "")]
    obtained: String,
    #[arg(long)]
    start: u32,
    #[arg(long)]
    end: u32,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Classify(args)) => run_classify(&runtime, args),
        Some(Commands::CleanupFiles(args)) => run_cleanup_files(&runtime, args),
        Some(Commands::Autosource(args)) => run_autosource(&runtime, args),
        Some(Commands::Move(args)) => run_move(&runtime, args),
        Some(Commands::Delete(args)) => run_delete(&runtime, args),
        Some(Commands::Redirect(args)) => run_redirect(&runtime, args),
        Some(Commands::Rate(args)) => run_rate(&runtime, args),
        Some(Commands::ListPages(args)) => run_list_pages(&runtime, args),
        Some(Commands::Download(args)) => run_download(&runtime, args),
        Some(Commands::CreateEpisodes(args)) => run_create_episodes(&runtime, args),
        Some(Commands::CreateCards(args)) => run_create_cards(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    if runtime.json() {
        return print_json(&json!({
            "project_root": normalize_for_display(&paths.project_root),
            "state_dir": normalize_for_display(&paths.state_dir),
            "config_path": normalize_for_display(&paths.config_path),
            "created_dirs": report.created_dirs.len(),
            "wrote_config": report.wrote_config,
        }));
    }
    println!("Initialized wikimaint runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("downloads_dir: {}", normalize_for_display(&paths.downloads_dir));
    println!("exports_dir: {}", normalize_for_display(&paths.exports_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_classify(runtime: &RuntimeOptions, args: ClassifyArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let rules = NormalizerRules::from_config(&config.cleanup);
    let text = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let outcome = classify_and_rewrite(&args.title, &text, &rules);

    if runtime.json() {
        return print_json(&outcome);
    }
    println!("classify");
    println!("title: {}", args.title);
    println!("classification: {}", outcome.classification.as_str());
    println!(
        "rule: {}",
        outcome.rule.map(|rule| rule.as_str()).unwrap_or("<none>")
    );
    println!("excluded: {}", format_flag(outcome.excluded));
    println!("changed: {}", format_flag(outcome.changed));
    if outcome.issues.is_empty() {
        println!("issues: <none>");
    } else {
        for issue in &outcome.issues {
            println!("issues.item: {issue}");
        }
    }
    if let Some(new_text) = outcome.new_text.as_deref().filter(|_| outcome.changed) {
        println!("\n{}", preview_diff(&text, new_text));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_cleanup_files(runtime: &RuntimeOptions, args: CleanupArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let rules = NormalizerRules::from_config(&config.cleanup);
    let mut titles = args.titles;
    if let Some(path) = &args.titles_file {
        titles.extend(read_title_list(path)?);
    }
    let options = CleanupOptions {
        titles: (!titles.is_empty()).then_some(titles),
        limit: args.limit,
        dry_run: args.dry_run,
    };
    let mut reviewer = ConsoleReviewer::new(runtime.format, args.yes);
    let linker = config.linker();

    let report = with_wiki_session(&config, |api| {
        run_file_cleanup(api, &rules, &linker, &options, &mut reviewer)
    })?;

    if runtime.json() {
        return print_json(&report);
    }
    print_cleanup_report(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_autosource(runtime: &RuntimeOptions, args: AutoSourceArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut classifier = GradioClassifier::from_config(&config.autosource, &config.user_agent())?;
    let options = AutoSourceOptions {
        limit: args.limit,
        dry_run: args.dry_run,
        delay: Duration::from_millis(args.delay_ms),
    };
    let mut reviewer = ConsoleReviewer::new(runtime.format, args.yes);
    let linker = config.linker();

    let report = with_wiki_session(&config, |api| {
        run_auto_source(
            api,
            &mut classifier,
            &config.autosource,
            &linker,
            &options,
            &mut reviewer,
        )
    })?;

    if runtime.json() {
        return print_json(&report);
    }
    print_autosource_report(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_move(runtime: &RuntimeOptions, args: MoveArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let rows = read_csv_rows(&args.csv)?;
    let options = MoveOptions {
        no_redirect: !args.keep_redirect,
        reason: args.reason,
    };
    let report = with_wiki_session(&config, |api| move_pages(api, &rows, &options))?;
    finish_batch(runtime, &paths, &report)
}

fn run_delete(runtime: &RuntimeOptions, args: DeleteArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let titles: Vec<String> = read_csv_rows(&args.csv)?
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect();
    let report = with_wiki_session(&config, |api| delete_pages(api, &titles, &args.reason))?;
    finish_batch(runtime, &paths, &report)
}

fn run_redirect(runtime: &RuntimeOptions, args: RedirectArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let rows = read_csv_rows(&args.csv)?;
    let report = with_wiki_session(&config, |api| create_redirects(api, &rows))?;
    finish_batch(runtime, &paths, &report)
}

fn run_rate(runtime: &RuntimeOptions, args: RateArgs) -> Result<()> {
    let rating = validate_rating(&args.rating)?;
    let (paths, config) = load_runtime(runtime)?;
    let titles = read_title_list(&args.list)?;
    let report = with_wiki_session(&config, |api| {
        rate_pages(api, &titles, &rating, &args.reason)
    })?;
    finish_batch(runtime, &paths, &report)
}

fn run_list_pages(runtime: &RuntimeOptions, args: ListPagesArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let output = args
        .output
        .unwrap_or_else(|| paths.exports_dir.join("pages.csv"));
    let mut api = MediaWikiClient::from_config(&config)?;
    let report = export_page_list(&mut api, &args.namespaces, &output)?;

    if runtime.json() {
        return print_json(&report);
    }
    print_page_list_report(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_download(runtime: &RuntimeOptions, args: DownloadArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let names = read_title_list(&args.list)?;
    let dir = args.dir.unwrap_or_else(|| paths.downloads_dir.clone());
    let mut api = MediaWikiClient::from_config(&config)?;
    let report = download_files(&mut api, &names, &dir)?;

    if runtime.json() {
        return print_json(&report);
    }
    print_download_report(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_create_episodes(runtime: &RuntimeOptions, args: EpisodeArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let url = args
        .data_url
        .clone()
        .unwrap_or_else(|| config.episodes.season_data_url_for(&args.season));
    let options = EpisodeOptions {
        season_name: args.season,
        season_abbr: args.abbr,
        conjectural: args.conjectural,
        watch: args.watch,
    };
    let report = with_wiki_session(&config, |api| {
        let data = fetch_season_data(api, &url)?;
        create_episode_pages(api, &options, &data)
    })?;
    finish_batch(runtime, &paths, &report)
}

fn run_create_cards(runtime: &RuntimeOptions, args: CardArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let options = CardOptions {
        rarity: args.rarity,
        release: args.release,
        obtained: args.obtained,
        start: args.start,
        end: args.end,
    };
    let report = with_wiki_session(&config, |api| create_card_pages(api, &options))?;
    finish_batch(runtime, &paths, &report)
}

/// Log in with the bot credentials, run `operation`, then log out.
fn with_wiki_session<T>(
    config: &WikiConfig,
    operation: impl FnOnce(&mut MediaWikiClient) -> Result<T>,
) -> Result<T> {
    let mut api = MediaWikiClient::login_from_env(config)?;
    let result = operation(&mut api);
    if let Err(error) = api.logout() {
        warn!("logout failed: {error:#}");
    }
    result
}

/// Interactive approval on the terminal. With `assume_yes` nothing is read from stdin.
struct ConsoleReviewer {
    format: OutputFormat,
    assume_yes: bool,
}

impl ConsoleReviewer {
    fn new(format: OutputFormat, assume_yes: bool) -> Self {
        Self { format, assume_yes }
    }

    // JSON mode keeps stdout for the final report.
    fn say(&self, line: &str) {
        match self.format {
            OutputFormat::Text => println!("{line}"),
            OutputFormat::Json => eprintln!("{line}"),
        }
    }

    fn read_answer(&self) -> Result<String> {
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read answer from stdin")?;
        Ok(answer.trim().to_ascii_lowercase())
    }
}

impl Reviewer for ConsoleReviewer {
    fn approve(&mut self, title: &str, url: &str, diff: &DiffPreview) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        self.say(&format!("\n{title}\n{url}\n{diff}"));
        self.say("Apply this edit? [y/N]: ");
        let answer = self.read_answer()?;
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }

    fn acknowledge(&mut self, title: &str, url: &str, message: &str) -> Result<()> {
        self.say(&format!("\n{title} needs manual attention: {message}\n{url}"));
        if self.assume_yes {
            return Ok(());
        }
        self.say("Press Enter to continue...");
        self.read_answer()?;
        Ok(())
    }

    fn record(&mut self, result: &PageResult) {
        if self.format == OutputFormat::Json {
            return;
        }
        if result.message.is_empty() {
            println!("[{}] {}", result.action.tag(), result.title);
        } else {
            println!("[{}] {} - {}", result.action.tag(), result.title, result.message);
        }
    }
}

fn print_cleanup_report(report: &CleanupReport) {
    println!("\ncleanup-files");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("scanned: {}", report.scanned);
    println!("fixed: {}", report.fixed);
    println!("would_fix: {}", report.would_fix);
    println!("declined: {}", report.declined);
    println!("compliant: {}", report.compliant);
    println!("manual: {}", report.manual);
    println!("blank: {}", report.blank);
    println!("missing: {}", report.missing);
    println!("errors: {}", report.errors.len());
    for error in &report.errors {
        println!("  - {}: {}", error.item, error.error);
    }
    println!("requests: {}", report.request_count);
}

fn print_autosource_report(report: &AutoSourceReport) {
    println!("\nautosource");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("candidates: {}", report.candidates);
    println!("processed: {}", report.processed);
    println!("saved: {}", report.saved);
    println!("errors: {}", report.errors.len());
    for error in &report.errors {
        println!("  - {}: {}", error.item, error.error);
    }
    println!("requests: {}", report.request_count);
}

fn finish_batch(
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
    report: &BatchReport,
) -> Result<()> {
    if runtime.json() {
        return print_json(report);
    }
    for item in &report.succeeded {
        println!("[OK] {item}");
    }
    for skipped in &report.skipped {
        println!("[SKIP] {} - {}", skipped.item, skipped.reason);
    }
    for error in &report.errors {
        println!("[ERROR] {} - {}", error.item, error.error);
    }
    println!("\n{}", report.operation);
    println!("processed: {}", report.processed);
    println!("succeeded: {}", report.succeeded.len());
    println!("skipped: {}", report.skipped.len());
    println!("errors: {}", report.errors.len());
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, paths);
    Ok(())
}

fn print_page_list_report(report: &PageListReport) {
    println!("list-pages");
    println!("output: {}", normalize_for_display(&report.path));
    println!(
        "namespaces: {}",
        report
            .namespaces
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );
    println!("titles: {}", report.count);
    println!("requests: {}", report.request_count);
}

fn print_download_report(report: &DownloadReport) {
    println!("download");
    println!("dir: {}", normalize_for_display(&report.dir));
    for file in &report.downloaded {
        println!(
            "[OK] {} ({} bytes, sha256 {})",
            file.file, file.bytes, file.sha256
        );
    }
    for name in &report.missing {
        println!("[SKIP] {name} - file not found");
    }
    for error in &report.errors {
        println!("[ERROR] {} - {}", error.item, error.error);
    }
    println!("downloaded: {}", report.downloaded.len());
    println!("missing: {}", report.missing.len());
    println!("errors: {}", report.errors.len());
    println!("requests: {}", report.request_count);
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, WikiConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
