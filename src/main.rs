// ============================================================================
// CPTRACK - Competitive Programming Practice Tracker
// ============================================================================
//
// MODULE STRUCTURE:
// 1. Imports & Constants        - Dependencies and storage keys
// 2. Data Structures            - Problem, Pattern, Template, Theme
// 3. Storage Adapter            - JSON-per-key persistence layer
// 4. App State                  - Domain collections and actions
// 5. Derivations                - Identifier, difficulty, status classifiers
// 6. Main Loop                  - Terminal UI initialization and event loop
// 7. UI State                   - App struct, cursors, overlays
// 8. Event Handling             - Keyboard, mouse, UI interactions
// 9. Editors                    - Form templates, formatting, and parsing
// 10. Rendering (Drawing)       - All UI output functions
// 11. Utilities                 - Clipboard, export, search, layout helpers
//
// Each section is clearly marked with section headers for easy navigation.
// ============================================================================

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use crossterm::{
    event::{
        self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
        MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::{debug, error, warn};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tui_textarea::{CursorMove, Input, Key, TextArea};
use uuid::Uuid;

// Storage keys: one JSON file per key under the data directory
const THEME_KEY: &str = "theme";
const PROBLEMS_KEY: &str = "problems";
const PATTERNS_KEY: &str = "patterns";
const TEMPLATES_KEY: &str = "templates";

// Security: refuse to read stored files beyond this size
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10 MB max per key

const SAVE_FAILED_MSG: &str =
    "Warning: latest change could not be written to disk; it is kept in memory only";

// ============================================================================
// DATA STRUCTURES - Problem, Pattern, Template, Theme
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    fn toggled(self) -> Theme {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
enum ProblemStatus {
    Complete,
    #[serde(rename = "In Progress")]
    InProgress,
    #[default]
    #[serde(rename = "To Do")]
    ToDo,
}

impl std::fmt::Display for ProblemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProblemStatus::Complete => write!(f, "Complete"),
            ProblemStatus::InProgress => write!(f, "In Progress"),
            ProblemStatus::ToDo => write!(f, "To Do"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum TemplateStatus {
    #[default]
    ToDo,
    InProgress,
    Revise,
    Memorized,
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateStatus::ToDo => write!(f, "to-do"),
            TemplateStatus::InProgress => write!(f, "in-progress"),
            TemplateStatus::Revise => write!(f, "revise"),
            TemplateStatus::Memorized => write!(f, "memorized"),
        }
    }
}

impl std::str::FromStr for TemplateStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "to-do" | "todo" => Ok(TemplateStatus::ToDo),
            "in-progress" | "inprogress" => Ok(TemplateStatus::InProgress),
            "revise" => Ok(TemplateStatus::Revise),
            "memorized" => Ok(TemplateStatus::Memorized),
            _ => {
                Err("Invalid Status. Valid options: to-do|in-progress|revise|memorized".to_string())
            }
        }
    }
}

impl TemplateStatus {
    fn next(self) -> TemplateStatus {
        match self {
            TemplateStatus::ToDo => TemplateStatus::InProgress,
            TemplateStatus::InProgress => TemplateStatus::Revise,
            TemplateStatus::Revise => TemplateStatus::Memorized,
            TemplateStatus::Memorized => TemplateStatus::ToDo,
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Problem {
    #[serde(default = "Uuid::new_v4")]
    uid: Uuid,
    id: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    difficulty: String,
    #[serde(default)]
    status: ProblemStatus,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    metacognition: String,
    #[serde(default)]
    takeaways: String,
    #[serde(default)]
    analysis: String,
    #[serde(default = "today")]
    added_on: NaiveDate,
}

impl Problem {
    fn new() -> Self {
        Self {
            uid: Uuid::new_v4(),
            id: String::new(),
            link: None,
            difficulty: String::new(),
            status: ProblemStatus::default(),
            patterns: Vec::new(),
            metacognition: String::new(),
            takeaways: String::new(),
            analysis: String::new(),
            added_on: today(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Pattern {
    #[serde(default = "Uuid::new_v4")]
    uid: Uuid,
    name: String,
    #[serde(default)]
    frequency: u32,
}

impl Pattern {
    fn new(name: &str) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            frequency: 0,
        }
    }
}

// Earlier revisions persisted patterns as bare name strings. Both shapes
// deserialize; the record shape is canonical and legacy entries are lifted
// to it (frequency 0) on load.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPattern {
    Record(Pattern),
    Legacy(String),
}

impl StoredPattern {
    fn lift(self) -> Pattern {
        match self {
            StoredPattern::Record(pattern) => pattern,
            StoredPattern::Legacy(name) => Pattern::new(&name),
        }
    }

    fn is_legacy(&self) -> bool {
        matches!(self, StoredPattern::Legacy(_))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Template {
    #[serde(default = "Uuid::new_v4")]
    uid: Uuid,
    title: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    status: TemplateStatus,
    #[serde(default)]
    frequency: u32,
    #[serde(default = "today")]
    added_on: NaiveDate,
}

impl Template {
    fn new(title: &str) -> Self {
        Self {
            uid: Uuid::new_v4(),
            title: title.to_string(),
            code: String::new(),
            status: TemplateStatus::default(),
            frequency: 0,
            added_on: today(),
        }
    }
}

// ============================================================================
// STORAGE ADAPTER - JSON-per-key persistence layer
// ============================================================================

struct Storage {
    root: PathBuf,
}

impl Storage {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn open_default() -> Result<Self> {
        let data_home = dirs::data_dir().context("could not determine data directory")?;
        let root = data_home.join("cptrack");
        fs::create_dir_all(&root)
            .with_context(|| format!("could not create data directory {}", root.display()))?;
        Ok(Self::new(root))
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Load the value stored under `key`. An absent key is an empty value;
    /// an unreadable or undecodable key falls back to the empty value and
    /// returns a warning for the UI to surface.
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> (T, Option<String>) {
        let path = self.path_for(key);
        if !path.exists() {
            return (T::default(), None);
        }
        match self.read_value(&path) {
            Ok(value) => (value, None),
            Err(err) => {
                error!("failed to load '{key}' from {}: {err:#}", path.display());
                let warning = format!(
                    "Stored data for '{key}' could not be read ({err}). Starting with an empty collection; the file on disk is left untouched until the next change."
                );
                (T::default(), Some(warning))
            }
        }
    }

    fn read_value<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_FILE_SIZE {
            anyhow::bail!("file exceeds maximum size limit - possible corruption");
        }
        let raw = fs::read_to_string(path)?;
        let value = serde_json::from_str(&raw)?;
        Ok(value)
    }

    /// Save is atomic per key: the full document is written to a temp file
    /// and renamed over the previous one, so a failed write never leaves a
    /// partially written collection behind.
    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let serialized = serde_json::to_string_pretty(value)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized)
            .with_context(|| format!("could not write {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("could not replace {}", path.display()))?;
        debug!("saved '{key}' to {}", path.display());
        Ok(())
    }
}

// ============================================================================
// APP STATE - Domain collections and actions
// ============================================================================

/// Single source of truth for the four persisted collections. Constructed
/// explicitly and passed by reference; every action mutates memory first and
/// then persists the affected key, returning the save outcome so callers and
/// tests can assert on it. Memory is never rolled back on a failed save.
struct AppState {
    theme: Theme,
    problems: Vec<Problem>,
    patterns: Vec<Pattern>,
    templates: Vec<Template>,
    storage: Storage,
}

impl AppState {
    /// Load all four keys exactly once. Corrupt keys hydrate empty and the
    /// collected warnings are surfaced by the UI instead of being swallowed.
    fn hydrate(storage: Storage) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        let (theme, warning) = storage.load::<Theme>(THEME_KEY);
        warnings.extend(warning);
        let (problems, warning) = storage.load::<Vec<Problem>>(PROBLEMS_KEY);
        warnings.extend(warning);
        let (stored_patterns, warning) = storage.load::<Vec<StoredPattern>>(PATTERNS_KEY);
        warnings.extend(warning);
        let (templates, warning) = storage.load::<Vec<Template>>(TEMPLATES_KEY);
        warnings.extend(warning);

        // One-time upgrade pass: rewrite the patterns key in the canonical
        // record shape as soon as a legacy bare-string entry is seen.
        let had_legacy = stored_patterns.iter().any(StoredPattern::is_legacy);
        let patterns: Vec<Pattern> = stored_patterns.into_iter().map(StoredPattern::lift).collect();
        if had_legacy {
            if let Err(err) = storage.save(PATTERNS_KEY, &patterns) {
                error!("failed to rewrite legacy pattern shape: {err:#}");
            }
        }

        let state = Self {
            theme,
            problems,
            patterns,
            templates,
            storage,
        };
        (state, warnings)
    }

    fn persist_problems(&self) -> Result<()> {
        self.storage.save(PROBLEMS_KEY, &self.problems)
    }

    fn persist_patterns(&self) -> Result<()> {
        self.storage.save(PATTERNS_KEY, &self.patterns)
    }

    fn persist_templates(&self) -> Result<()> {
        self.storage.save(TEMPLATES_KEY, &self.templates)
    }

    /// Best-effort flush of everything, used on exit.
    fn persist_all(&self) {
        for result in [
            self.storage.save(THEME_KEY, &self.theme),
            self.persist_problems(),
            self.persist_patterns(),
            self.persist_templates(),
        ] {
            if let Err(err) = result {
                error!("final save failed: {err:#}");
            }
        }
    }

    fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.theme = theme;
        self.storage.save(THEME_KEY, &self.theme)
    }

    fn add_problem(&mut self, problem: Problem) -> Result<()> {
        self.problems.push(problem);
        self.persist_problems()
    }

    fn update_problem(&mut self, updated: Problem) -> Result<bool> {
        let Some(slot) = self.problems.iter_mut().find(|p| p.uid == updated.uid) else {
            return Ok(false);
        };
        *slot = updated;
        self.persist_problems()?;
        Ok(true)
    }

    fn delete_problem(&mut self, uid: Uuid) -> Result<bool> {
        let before = self.problems.len();
        self.problems.retain(|p| p.uid != uid);
        if self.problems.len() == before {
            return Ok(false);
        }
        self.persist_problems()?;
        Ok(true)
    }

    /// No-op when a pattern with the same name already exists.
    fn add_pattern(&mut self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() || self.patterns.iter().any(|p| p.name == name) {
            return Ok(false);
        }
        self.patterns.push(Pattern::new(name));
        self.persist_patterns()?;
        Ok(true)
    }

    fn delete_pattern(&mut self, uid: Uuid) -> Result<bool> {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.uid != uid);
        if self.patterns.len() == before {
            return Ok(false);
        }
        self.persist_patterns()?;
        Ok(true)
    }

    fn bump_pattern_frequency(&mut self, uid: Uuid, delta: i32) -> Result<bool> {
        let Some(pattern) = self.patterns.iter_mut().find(|p| p.uid == uid) else {
            return Ok(false);
        };
        pattern.frequency = apply_frequency_delta(pattern.frequency, delta);
        self.persist_patterns()?;
        Ok(true)
    }

    fn add_template(&mut self, template: Template) -> Result<()> {
        self.templates.push(template);
        self.persist_templates()
    }

    fn update_template(&mut self, updated: Template) -> Result<bool> {
        let Some(slot) = self.templates.iter_mut().find(|t| t.uid == updated.uid) else {
            return Ok(false);
        };
        *slot = updated;
        self.persist_templates()?;
        Ok(true)
    }

    fn delete_template(&mut self, uid: Uuid) -> Result<bool> {
        let before = self.templates.len();
        self.templates.retain(|t| t.uid != uid);
        if self.templates.len() == before {
            return Ok(false);
        }
        self.persist_templates()?;
        Ok(true)
    }

    fn set_template_status(&mut self, uid: Uuid, status: TemplateStatus) -> Result<bool> {
        let Some(template) = self.templates.iter_mut().find(|t| t.uid == uid) else {
            return Ok(false);
        };
        template.status = status;
        self.persist_templates()?;
        Ok(true)
    }

    fn bump_template_frequency(&mut self, uid: Uuid, delta: i32) -> Result<bool> {
        let Some(template) = self.templates.iter_mut().find(|t| t.uid == uid) else {
            return Ok(false);
        };
        template.frequency = apply_frequency_delta(template.frequency, delta);
        self.persist_templates()?;
        Ok(true)
    }
}

// Frequency counters never go negative
fn apply_frequency_delta(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

// ============================================================================
// DERIVATIONS - Identifier, difficulty, status classifiers
// ============================================================================

/// Split a URL-shaped string into (hostname, path segments). The scheme and
/// a leading www. are optional; anything with whitespace or without a dotted
/// hostname is not URL-shaped.
fn split_url(input: &str) -> Option<(String, Vec<String>)> {
    let re = Regex::new(
        r"^(?:[A-Za-z][A-Za-z0-9+.-]*://)?(?:www\.)?([A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,})(/\S*)?$",
    )
    .ok()?;
    let caps = re.captures(input.trim())?;
    let host = caps.get(1)?.as_str().to_lowercase();
    let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    Some((host, segments))
}

fn segment_after(segments: &[String], marker: &str) -> Option<String> {
    let pos = segments.iter().position(|s| s == marker)?;
    segments.get(pos + 1).cloned()
}

/// Derive a short display identifier from a submitted problem reference.
/// Known judges get a platform-prefixed code; unknown hosts fall back to the
/// last path segment; anything that is not URL-shaped is returned unchanged.
/// This is best-effort and never fails.
fn derive_problem_id(input: &str) -> String {
    let trimmed = input.trim();
    let Some((host, segments)) = split_url(trimmed) else {
        return trimmed.to_string();
    };

    if host == "leetcode.com" || host.ends_with(".leetcode.com") {
        if let Some(slug) = segment_after(&segments, "problems") {
            return slug;
        }
    } else if host == "codeforces.com" || host.ends_with(".codeforces.com") {
        // Both /problem/1427E and /contest/1427/problem/E collapse to CF1427E
        let code: Vec<String> = segments
            .iter()
            .filter(|s| !matches!(s.as_str(), "problem" | "contest" | "problemset"))
            .cloned()
            .collect();
        if !code.is_empty() {
            return format!("CF{}", code.join(""));
        }
    } else if host == "atcoder.jp" || host.ends_with(".atcoder.jp") {
        if let Some(task) = segment_after(&segments, "tasks") {
            return format!("AC{task}");
        }
    }

    segments
        .last()
        .cloned()
        .unwrap_or_else(|| trimmed.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DifficultyBand {
    Easy,
    Medium,
    Hard,
    Unknown,
}

/// Classify a free-form difficulty value for display styling: substring or
/// single-letter shorthand first, then numeric rating bands.
fn classify_difficulty(raw: &str) -> DifficultyBand {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() {
        return DifficultyBand::Unknown;
    }
    if lower.contains("easy") || lower == "e" {
        return DifficultyBand::Easy;
    }
    if lower.contains("medium") || lower == "m" {
        return DifficultyBand::Medium;
    }
    if lower.contains("hard") || lower == "h" {
        return DifficultyBand::Hard;
    }
    if let Ok(rating) = lower.parse::<f64>() {
        return if rating <= 1200.0 {
            DifficultyBand::Easy
        } else if rating <= 1800.0 {
            DifficultyBand::Medium
        } else {
            DifficultyBand::Hard
        };
    }
    DifficultyBand::Unknown
}

/// Classify a free-form status value: substring match, defaulting to To Do.
fn classify_status(raw: &str) -> ProblemStatus {
    let lower = raw.trim().to_lowercase();
    if lower.contains("complete") {
        ProblemStatus::Complete
    } else if lower.contains("progress") {
        ProblemStatus::InProgress
    } else {
        ProblemStatus::ToDo
    }
}

// ============================================================================
// MAIN LOOP - Terminal UI initialization and event loop
// ============================================================================

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
    }
}

// Log to a file inside the data directory; writing to stderr would tear up
// the alternate screen.
fn init_logging(root: &Path) {
    let env = env_logger::Env::default().default_filter_or("info");
    match fs::File::create(root.join("cptrack.log")) {
        Ok(file) => {
            let _ = env_logger::Builder::from_env(env)
                .target(env_logger::Target::Pipe(Box::new(file)))
                .try_init();
        }
        Err(_) => {
            let _ = env_logger::Builder::from_env(env).try_init();
        }
    }
}

fn run() -> Result<()> {
    let storage = Storage::open_default()?;
    init_logging(storage.root());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, event::EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, storage);

    disable_raw_mode().ok();
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        event::DisableMouseCapture
    )
    .ok();
    terminal.show_cursor().ok();

    res
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, storage: Storage) -> Result<()> {
    let (state, warnings) = AppState::hydrate(storage);
    let mut app = App::new(state, warnings);
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| draw(frame, &mut app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::from_secs(0));

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if handle_key(&mut app, key)? {
                        // Flush everything before exit
                        app.state.persist_all();
                        break;
                    }
                }
                Event::Mouse(mouse) => handle_mouse(&mut app, mouse),
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }

    Ok(())
}

// ============================================================================
// UI STATE - App struct, cursors, overlays
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum ViewMode {
    Problems,
    Patterns,
    Templates,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EditTarget {
    None,
    ProblemNew,
    ProblemEdit,
    PatternNew,
    TemplateNew,
    TemplateEdit,
}

#[derive(Clone, Copy)]
enum DeleteTarget {
    Problem(Uuid),
    Pattern(Uuid),
    Template(Uuid),
}

struct PendingDelete {
    target: DeleteTarget,
    label: String,
}

#[derive(Clone, Copy)]
enum SearchTarget {
    Problem(usize),
    Pattern(usize),
    Template(usize),
}

#[derive(Clone)]
struct SearchHit {
    title: String,
    detail: String,
    target: SearchTarget,
    score: i32,
}

struct App {
    state: AppState,
    view_mode: ViewMode,

    // List cursors; positions are display positions and revalidated each
    // frame, entity references held across frames are always uids
    current_problem_idx: usize,
    current_pattern_idx: usize,
    current_template_idx: usize,

    // Active pattern filter for the problems list
    filter_pattern: Option<(Uuid, String)>,

    // Form editing
    editing_input: String,
    textarea: TextArea<'static>,
    edit_target: EditTarget,
    editing_uid: Option<Uuid>,
    form_area: Rect,

    // Delete confirmation
    pending_delete: Option<PendingDelete>,
    confirm_yes_btn: Rect,
    confirm_no_btn: Rect,

    // Validation error popup
    show_validation_error: bool,
    validation_error_message: String,

    // Startup corruption warnings
    startup_warnings: Vec<String>,
    show_startup_warning: bool,

    // Status line (save failures, copy/export notes)
    status_message: Option<String>,

    // Global fuzzy search
    show_global_search: bool,
    global_search_query: String,
    global_search_results: Vec<SearchHit>,
    global_search_selected: usize,
    search_result_items: Vec<(usize, Rect)>,

    // Help overlay
    show_help_overlay: bool,
    help_search_query: String,
    help_scroll: u16,

    // Detail / code panels
    template_expanded: bool,
    code_scroll: u16,
    detail_scroll: u16,
    detail_area: Rect,
    code_area: Rect,

    // UI areas for mouse support
    view_mode_btns: Vec<(ViewMode, Rect)>,
    theme_btn: Rect,
    search_btn: Rect,
    help_btn: Rect,
    problem_items: Vec<(usize, Rect)>,
    prob_add_btn: Rect,
    prob_edit_btn: Rect,
    prob_delete_btn: Rect,
    prob_open_btn: Rect,
    prob_export_btn: Rect,
    prob_clear_filter_btn: Rect,
    pattern_items: Vec<(usize, Rect)>,
    pat_add_btn: Rect,
    pat_delete_btn: Rect,
    pat_inc_btn: Rect,
    pat_dec_btn: Rect,
    pat_filter_btn: Rect,
    pat_copy_btn: Rect,
    template_items: Vec<(usize, Rect)>,
    tpl_add_btn: Rect,
    tpl_edit_btn: Rect,
    tpl_delete_btn: Rect,
    tpl_copy_btn: Rect,
    tpl_status_btn: Rect,
    tpl_inc_btn: Rect,
    tpl_dec_btn: Rect,
}

impl App {
    fn new(state: AppState, startup_warnings: Vec<String>) -> Self {
        let show_startup_warning = !startup_warnings.is_empty();
        Self {
            state,
            view_mode: ViewMode::Problems,
            current_problem_idx: 0,
            current_pattern_idx: 0,
            current_template_idx: 0,
            filter_pattern: None,
            editing_input: String::new(),
            textarea: TextArea::new(vec![String::new()]),
            edit_target: EditTarget::None,
            editing_uid: None,
            form_area: Rect::default(),
            pending_delete: None,
            confirm_yes_btn: Rect::default(),
            confirm_no_btn: Rect::default(),
            show_validation_error: false,
            validation_error_message: String::new(),
            startup_warnings,
            show_startup_warning,
            status_message: None,
            show_global_search: false,
            global_search_query: String::new(),
            global_search_results: Vec::new(),
            global_search_selected: 0,
            search_result_items: Vec::new(),
            show_help_overlay: false,
            help_search_query: String::new(),
            help_scroll: 0,
            template_expanded: false,
            code_scroll: 0,
            detail_scroll: 0,
            detail_area: Rect::default(),
            code_area: Rect::default(),
            view_mode_btns: Vec::new(),
            theme_btn: Rect::default(),
            search_btn: Rect::default(),
            help_btn: Rect::default(),
            problem_items: Vec::new(),
            prob_add_btn: Rect::default(),
            prob_edit_btn: Rect::default(),
            prob_delete_btn: Rect::default(),
            prob_open_btn: Rect::default(),
            prob_export_btn: Rect::default(),
            prob_clear_filter_btn: Rect::default(),
            pattern_items: Vec::new(),
            pat_add_btn: Rect::default(),
            pat_delete_btn: Rect::default(),
            pat_inc_btn: Rect::default(),
            pat_dec_btn: Rect::default(),
            pat_filter_btn: Rect::default(),
            pat_copy_btn: Rect::default(),
            template_items: Vec::new(),
            tpl_add_btn: Rect::default(),
            tpl_edit_btn: Rect::default(),
            tpl_delete_btn: Rect::default(),
            tpl_copy_btn: Rect::default(),
            tpl_status_btn: Rect::default(),
            tpl_inc_btn: Rect::default(),
            tpl_dec_btn: Rect::default(),
        }
    }

    fn is_editing(&self) -> bool {
        !matches!(self.edit_target, EditTarget::None)
    }

    /// Indices into `state.problems` that the problems list currently shows,
    /// honoring the active pattern filter. Association is by pattern name.
    fn visible_problem_indices(&self) -> Vec<usize> {
        self.state
            .problems
            .iter()
            .enumerate()
            .filter(|(_, problem)| match &self.filter_pattern {
                Some((_, name)) => problem.patterns.iter().any(|p| p == name),
                None => true,
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn selected_problem(&self) -> Option<&Problem> {
        let visible = self.visible_problem_indices();
        visible
            .get(self.current_problem_idx)
            .and_then(|idx| self.state.problems.get(*idx))
    }

    fn selected_pattern(&self) -> Option<&Pattern> {
        self.state.patterns.get(self.current_pattern_idx)
    }

    fn selected_template(&self) -> Option<&Template> {
        self.state.templates.get(self.current_template_idx)
    }

    fn validate_indices(&mut self) {
        // A filter referencing a deleted pattern must not survive; deletes
        // already clear it, this guards every other path.
        if let Some((uid, _)) = &self.filter_pattern {
            let uid = *uid;
            if !self.state.patterns.iter().any(|p| p.uid == uid) {
                self.filter_pattern = None;
            }
        }
        let visible = self.visible_problem_indices().len();
        if self.current_problem_idx >= visible {
            self.current_problem_idx = 0;
        }
        if self.current_pattern_idx >= self.state.patterns.len() {
            self.current_pattern_idx = 0;
        }
        if self.current_template_idx >= self.state.templates.len() {
            self.current_template_idx = 0;
        }
    }

    fn start_text_editing(&mut self, content: String) {
        self.textarea = TextArea::new(content.lines().map(|s| s.to_string()).collect());
        self.editing_input = content;
        // Land at the end of the first line, where the first field value goes
        self.textarea.move_cursor(CursorMove::Jump(0, 0));
        self.textarea.move_cursor(CursorMove::End);
    }

    /// Closing a form always resets the buffer so no stale data leaks into
    /// the next open.
    fn close_form(&mut self) {
        self.edit_target = EditTarget::None;
        self.editing_uid = None;
        self.editing_input.clear();
        self.textarea = TextArea::new(vec![String::new()]);
    }
}

// Helper: Set up editor for a given target with initial content
fn start_editing(app: &mut App, target: EditTarget, content: String) {
    app.start_text_editing(content);
    app.edit_target = target;
}

/// Show validation error popup without saving
#[inline]
fn handle_validation_error(app: &mut App, error_msg: &str, context: &str) {
    app.show_validation_error = true;
    app.validation_error_message =
        format!("{} Error: {}\n\nPlease correct and try again.", context, error_msg);
}

/// Record a failed save on the status line; in-memory state keeps the change.
fn note_save_outcome<T>(app: &mut App, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            error!("persist failed: {err:#}");
            app.status_message = Some(SAVE_FAILED_MSG.to_string());
            None
        }
    }
}

fn set_status(app: &mut App, message: impl Into<String>) {
    app.status_message = Some(message.into());
}

// ============================================================================
// EVENT HANDLING - Keyboard, mouse, UI interactions
// ============================================================================

fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Ok(true);
    }

    app.status_message = None;

    // Delete confirmation gates everything else; canceling performs nothing
    if app.pending_delete.is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => perform_pending_delete(app),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.pending_delete = None,
            _ => {}
        }
        return Ok(false);
    }

    if app.show_validation_error {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
            app.show_validation_error = false;
            app.validation_error_message.clear();
        }
        return Ok(false);
    }

    if app.show_startup_warning {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
            app.show_startup_warning = false;
        }
        return Ok(false);
    }

    if app.show_help_overlay {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => {
                app.show_help_overlay = false;
                app.help_search_query.clear();
                app.help_scroll = 0;
            }
            KeyCode::Up => app.help_scroll = app.help_scroll.saturating_sub(1),
            KeyCode::Down => app.help_scroll = app.help_scroll.saturating_add(1),
            KeyCode::PageUp => app.help_scroll = app.help_scroll.saturating_sub(10),
            KeyCode::PageDown => app.help_scroll = app.help_scroll.saturating_add(10),
            KeyCode::Backspace => {
                app.help_search_query.pop();
                app.help_scroll = 0;
            }
            KeyCode::Char('?') => {
                app.show_help_overlay = false;
                app.help_search_query.clear();
                app.help_scroll = 0;
            }
            KeyCode::Char(c) => {
                app.help_search_query.push(c);
                app.help_scroll = 0;
            }
            _ => {}
        }
        return Ok(false);
    }

    if app.show_global_search {
        match key.code {
            KeyCode::Esc => close_global_search(app),
            KeyCode::Enter => jump_to_search_hit(app),
            KeyCode::Up => {
                app.global_search_selected = app.global_search_selected.saturating_sub(1);
            }
            KeyCode::Down => {
                if app.global_search_selected + 1 < app.global_search_results.len() {
                    app.global_search_selected += 1;
                }
            }
            KeyCode::Backspace => {
                app.global_search_query.pop();
                run_global_search(app);
            }
            KeyCode::Char(c) => {
                app.global_search_query.push(c);
                run_global_search(app);
            }
            _ => {}
        }
        return Ok(false);
    }

    // Ctrl+S: Save the open form
    if key.code == KeyCode::Char('s')
        && key.modifiers.contains(KeyModifiers::CONTROL)
        && app.is_editing()
    {
        app.editing_input = app.textarea.lines().join("\n");
        submit_form(app);
        return Ok(false);
    }

    // Esc: Cancel the open form without saving; the buffer resets
    if key.code == KeyCode::Esc && app.is_editing() {
        app.close_form();
        return Ok(false);
    }

    if app.is_editing() {
        // Forward all key events to the textarea for normal text editing
        let input = textarea_input_from_key(key);
        app.textarea.input(input);
        app.editing_input = app.textarea.lines().join("\n");
        return Ok(false);
    }

    // Global navigation
    match key.code {
        KeyCode::Char('q') => return Ok(true),
        KeyCode::Char('f') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            open_global_search(app);
            return Ok(false);
        }
        KeyCode::Char('1') => {
            app.view_mode = ViewMode::Problems;
            return Ok(false);
        }
        KeyCode::Char('2') => {
            app.view_mode = ViewMode::Patterns;
            return Ok(false);
        }
        KeyCode::Char('3') => {
            app.view_mode = ViewMode::Templates;
            return Ok(false);
        }
        KeyCode::Tab => {
            app.view_mode = next_view(app.view_mode);
            return Ok(false);
        }
        KeyCode::Char('t') => {
            let next = app.state.theme.toggled();
            let res = app.state.set_theme(next);
            note_save_outcome(app, res);
            return Ok(false);
        }
        KeyCode::Char('?') => {
            app.show_help_overlay = true;
            return Ok(false);
        }
        _ => {}
    }

    match app.view_mode {
        ViewMode::Problems => handle_problems_key(app, key),
        ViewMode::Patterns => handle_patterns_key(app, key),
        ViewMode::Templates => handle_templates_key(app, key),
    }

    Ok(false)
}

fn next_view(view: ViewMode) -> ViewMode {
    match view {
        ViewMode::Problems => ViewMode::Patterns,
        ViewMode::Patterns => ViewMode::Templates,
        ViewMode::Templates => ViewMode::Problems,
    }
}

fn textarea_input_from_key(key: KeyEvent) -> Input {
    Input {
        key: match key.code {
            KeyCode::Char(c) => Key::Char(c),
            KeyCode::Enter => Key::Enter,
            KeyCode::Backspace => Key::Backspace,
            KeyCode::Delete => Key::Delete,
            KeyCode::Left => Key::Left,
            KeyCode::Right => Key::Right,
            KeyCode::Up => Key::Up,
            KeyCode::Down => Key::Down,
            KeyCode::Tab => Key::Tab,
            KeyCode::Home => Key::Home,
            KeyCode::End => Key::End,
            KeyCode::PageUp => Key::PageUp,
            KeyCode::PageDown => Key::PageDown,
            KeyCode::Esc => Key::Esc,
            KeyCode::F(n) => Key::F(n),
            _ => Key::Null,
        },
        ctrl: key.modifiers.contains(KeyModifiers::CONTROL),
        alt: key.modifiers.contains(KeyModifiers::ALT),
    }
}

fn handle_problems_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up => {
            app.current_problem_idx = app.current_problem_idx.saturating_sub(1);
            app.detail_scroll = 0;
        }
        KeyCode::Down => {
            if app.current_problem_idx + 1 < app.visible_problem_indices().len() {
                app.current_problem_idx += 1;
            }
            app.detail_scroll = 0;
        }
        KeyCode::PageUp => app.detail_scroll = app.detail_scroll.saturating_sub(10),
        KeyCode::PageDown => app.detail_scroll = app.detail_scroll.saturating_add(10),
        KeyCode::Char('n') => open_problem_form(app),
        KeyCode::Char('e') => open_problem_edit_form(app),
        KeyCode::Char('d') | KeyCode::Delete => request_problem_delete(app),
        KeyCode::Char('o') | KeyCode::Enter => open_problem_link(app),
        KeyCode::Char('x') => export_problems(app),
        KeyCode::Char('c') => app.filter_pattern = None,
        _ => {}
    }
}

fn handle_patterns_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up => app.current_pattern_idx = app.current_pattern_idx.saturating_sub(1),
        KeyCode::Down => {
            if app.current_pattern_idx + 1 < app.state.patterns.len() {
                app.current_pattern_idx += 1;
            }
        }
        KeyCode::Char('n') => open_pattern_form(app),
        KeyCode::Char('d') | KeyCode::Delete => request_pattern_delete(app),
        KeyCode::Char('+') | KeyCode::Char('=') => bump_selected_pattern(app, 1),
        KeyCode::Char('-') => bump_selected_pattern(app, -1),
        KeyCode::Enter | KeyCode::Char('f') => toggle_pattern_filter(app),
        KeyCode::Char('c') => copy_pattern_list(app),
        _ => {}
    }
}

fn handle_templates_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up => {
            app.current_template_idx = app.current_template_idx.saturating_sub(1);
            app.code_scroll = 0;
        }
        KeyCode::Down => {
            if app.current_template_idx + 1 < app.state.templates.len() {
                app.current_template_idx += 1;
            }
            app.code_scroll = 0;
        }
        KeyCode::PageUp => app.code_scroll = app.code_scroll.saturating_sub(10),
        KeyCode::PageDown => app.code_scroll = app.code_scroll.saturating_add(10),
        KeyCode::Char('n') => open_template_form(app),
        KeyCode::Char('e') => open_template_edit_form(app),
        KeyCode::Char('d') | KeyCode::Delete => request_template_delete(app),
        KeyCode::Enter => {
            app.template_expanded = !app.template_expanded;
            app.code_scroll = 0;
        }
        KeyCode::Char('c') => copy_template_code(app),
        KeyCode::Char('s') => cycle_template_status(app),
        KeyCode::Char('+') | KeyCode::Char('=') => bump_selected_template(app, 1),
        KeyCode::Char('-') => bump_selected_template(app, -1),
        _ => {}
    }
}

// --- Form openers and per-entity actions ---

fn open_problem_form(app: &mut App) {
    let template = new_problem_editor_template(&app.state.patterns);
    start_editing(app, EditTarget::ProblemNew, template);
}

fn open_problem_edit_form(app: &mut App) {
    let Some(problem) = app.selected_problem().cloned() else {
        return;
    };
    app.editing_uid = Some(problem.uid);
    let content = format_problem_editor_content(&problem);
    start_editing(app, EditTarget::ProblemEdit, content);
}

fn request_problem_delete(app: &mut App) {
    let Some((uid, id)) = app.selected_problem().map(|p| (p.uid, p.id.clone())) else {
        return;
    };
    app.pending_delete = Some(PendingDelete {
        target: DeleteTarget::Problem(uid),
        label: format!("problem '{id}'"),
    });
}

fn open_problem_link(app: &mut App) {
    let Some(link) = app.selected_problem().and_then(|p| p.link.clone()) else {
        set_status(app, "No link recorded for this problem");
        return;
    };
    // Fire-and-forget; failures are logged, never surfaced as errors
    if let Err(err) = open::that(&link) {
        warn!("failed to open link {link}: {err}");
    }
}

fn export_problems(app: &mut App) {
    let result = export_problems_csv(app.state.storage.root(), &app.state.problems);
    match result {
        Ok(path) => {
            let count = app.state.problems.len();
            set_status(app, format!("Exported {count} problems to {}", path.display()));
        }
        Err(err) => {
            error!("csv export failed: {err:#}");
            set_status(app, "Warning: CSV export failed; see the log file");
        }
    }
}

fn open_pattern_form(app: &mut App) {
    start_editing(app, EditTarget::PatternNew, new_pattern_editor_template());
}

fn request_pattern_delete(app: &mut App) {
    let Some((uid, name)) = app.selected_pattern().map(|p| (p.uid, p.name.clone())) else {
        return;
    };
    app.pending_delete = Some(PendingDelete {
        target: DeleteTarget::Pattern(uid),
        label: format!("pattern '{name}'"),
    });
}

fn bump_selected_pattern(app: &mut App, delta: i32) {
    let Some(uid) = app.selected_pattern().map(|p| p.uid) else {
        return;
    };
    let res = app.state.bump_pattern_frequency(uid, delta);
    note_save_outcome(app, res);
}

fn toggle_pattern_filter(app: &mut App) {
    let Some((uid, name)) = app.selected_pattern().map(|p| (p.uid, p.name.clone())) else {
        return;
    };
    match &app.filter_pattern {
        Some((active, _)) if *active == uid => app.filter_pattern = None,
        _ => {
            app.filter_pattern = Some((uid, name));
            app.view_mode = ViewMode::Problems;
            app.current_problem_idx = 0;
        }
    }
}

fn copy_pattern_list(app: &mut App) {
    if app.state.patterns.is_empty() {
        return;
    }
    let text = app
        .state
        .patterns
        .iter()
        .map(|p| format!("{} (x{})", p.name, p.frequency))
        .collect::<Vec<_>>()
        .join("\n");
    match copy_to_clipboard(&text) {
        Ok(()) => set_status(app, "Pattern list copied to clipboard"),
        Err(err) => warn!("clipboard copy failed: {err:#}"),
    }
}

fn open_template_form(app: &mut App) {
    start_editing(app, EditTarget::TemplateNew, new_template_editor_template());
}

fn open_template_edit_form(app: &mut App) {
    let Some(template) = app.selected_template().cloned() else {
        return;
    };
    app.editing_uid = Some(template.uid);
    let content = format_template_editor_content(&template);
    start_editing(app, EditTarget::TemplateEdit, content);
}

fn request_template_delete(app: &mut App) {
    let Some((uid, title)) = app.selected_template().map(|t| (t.uid, t.title.clone())) else {
        return;
    };
    app.pending_delete = Some(PendingDelete {
        target: DeleteTarget::Template(uid),
        label: format!("template '{title}'"),
    });
}

fn copy_template_code(app: &mut App) {
    let Some(code) = app.selected_template().map(|t| t.code.clone()) else {
        return;
    };
    match copy_to_clipboard(&code) {
        Ok(()) => set_status(app, "Template code copied to clipboard"),
        Err(err) => warn!("clipboard copy failed: {err:#}"),
    }
}

fn cycle_template_status(app: &mut App) {
    let Some((uid, status)) = app.selected_template().map(|t| (t.uid, t.status)) else {
        return;
    };
    let res = app.state.set_template_status(uid, status.next());
    note_save_outcome(app, res);
}

fn bump_selected_template(app: &mut App, delta: i32) {
    let Some(uid) = app.selected_template().map(|t| t.uid) else {
        return;
    };
    let res = app.state.bump_template_frequency(uid, delta);
    note_save_outcome(app, res);
}

fn perform_pending_delete(app: &mut App) {
    let Some(pending) = app.pending_delete.take() else {
        return;
    };
    match pending.target {
        DeleteTarget::Problem(uid) => {
            let res = app.state.delete_problem(uid);
            note_save_outcome(app, res);
        }
        DeleteTarget::Pattern(uid) => {
            // Clearing the filter in the same action leaves no stale reference
            if app
                .filter_pattern
                .as_ref()
                .is_some_and(|(active, _)| *active == uid)
            {
                app.filter_pattern = None;
            }
            let res = app.state.delete_pattern(uid);
            note_save_outcome(app, res);
        }
        DeleteTarget::Template(uid) => {
            let res = app.state.delete_template(uid);
            note_save_outcome(app, res);
        }
    }
}

fn submit_form(app: &mut App) {
    let input = app.editing_input.clone();
    match app.edit_target {
        EditTarget::None => {}
        EditTarget::ProblemNew => match parse_problem_editor_content(&input, None) {
            Ok(problem) => {
                let res = app.state.add_problem(problem);
                note_save_outcome(app, res);
                app.close_form();
                let visible = app.visible_problem_indices().len();
                app.current_problem_idx = visible.saturating_sub(1);
            }
            Err(err) => handle_validation_error(app, &err, "Problem"),
        },
        EditTarget::ProblemEdit => {
            let existing = app
                .editing_uid
                .and_then(|uid| app.state.problems.iter().find(|p| p.uid == uid).cloned());
            match parse_problem_editor_content(&input, existing.as_ref()) {
                Ok(updated) => {
                    let res = app.state.update_problem(updated);
                    note_save_outcome(app, res);
                    app.close_form();
                }
                Err(err) => handle_validation_error(app, &err, "Problem"),
            }
        }
        EditTarget::PatternNew => {
            // Empty names and duplicates are silently ignored
            let name = parse_pattern_editor_content(&input);
            if !name.is_empty() {
                let res = app.state.add_pattern(&name);
                if note_save_outcome(app, res) == Some(true) {
                    app.current_pattern_idx = app.state.patterns.len().saturating_sub(1);
                }
            }
            app.close_form();
        }
        EditTarget::TemplateNew => match parse_template_editor_content(&input, None) {
            Ok(template) => {
                let res = app.state.add_template(template);
                note_save_outcome(app, res);
                app.close_form();
                app.current_template_idx = app.state.templates.len().saturating_sub(1);
            }
            Err(err) => handle_validation_error(app, &err, "Template"),
        },
        EditTarget::TemplateEdit => {
            let existing = app
                .editing_uid
                .and_then(|uid| app.state.templates.iter().find(|t| t.uid == uid).cloned());
            match parse_template_editor_content(&input, existing.as_ref()) {
                Ok(updated) => {
                    let res = app.state.update_template(updated);
                    note_save_outcome(app, res);
                    app.close_form();
                }
                Err(err) => handle_validation_error(app, &err, "Template"),
            }
        }
    }
}

// --- Global fuzzy search ---

fn open_global_search(app: &mut App) {
    app.show_global_search = true;
    app.global_search_query.clear();
    app.global_search_selected = 0;
    run_global_search(app);
}

fn close_global_search(app: &mut App) {
    app.show_global_search = false;
    app.global_search_query.clear();
    app.global_search_results.clear();
    app.global_search_selected = 0;
}

fn jump_to_search_hit(app: &mut App) {
    let Some(hit) = app.global_search_results.get(app.global_search_selected) else {
        close_global_search(app);
        return;
    };
    let target = hit.target;
    close_global_search(app);
    match target {
        SearchTarget::Problem(idx) => {
            // The hit indexes the unfiltered collection
            app.filter_pattern = None;
            app.view_mode = ViewMode::Problems;
            app.current_problem_idx = idx.min(app.state.problems.len().saturating_sub(1));
            app.detail_scroll = 0;
        }
        SearchTarget::Pattern(idx) => {
            app.view_mode = ViewMode::Patterns;
            app.current_pattern_idx = idx.min(app.state.patterns.len().saturating_sub(1));
        }
        SearchTarget::Template(idx) => {
            app.view_mode = ViewMode::Templates;
            app.current_template_idx = idx.min(app.state.templates.len().saturating_sub(1));
            app.code_scroll = 0;
        }
    }
}

// --- Mouse ---

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => handle_left_click(app, mouse),
        MouseEventKind::ScrollUp => handle_scroll(app, mouse, -1),
        MouseEventKind::ScrollDown => handle_scroll(app, mouse, 1),
        _ => {}
    }
}

fn handle_left_click(app: &mut App, mouse: MouseEvent) {
    app.status_message = None;

    if app.pending_delete.is_some() {
        if inside_rect(mouse, app.confirm_yes_btn) {
            perform_pending_delete(app);
        } else if inside_rect(mouse, app.confirm_no_btn) {
            app.pending_delete = None;
        }
        return;
    }
    if app.show_validation_error {
        app.show_validation_error = false;
        app.validation_error_message.clear();
        return;
    }
    if app.show_startup_warning {
        app.show_startup_warning = false;
        return;
    }
    if app.show_help_overlay {
        app.show_help_overlay = false;
        app.help_search_query.clear();
        app.help_scroll = 0;
        return;
    }
    if app.show_global_search {
        if let Some(idx) = find_clicked_item(mouse, &app.search_result_items.clone()) {
            app.global_search_selected = idx;
            jump_to_search_hit(app);
        }
        return;
    }
    if app.is_editing() {
        // A click outside the form content area closes it; the buffer resets
        if !inside_rect(mouse, app.form_area) {
            app.close_form();
        }
        return;
    }

    // Navigation bar
    for (mode, rect) in app.view_mode_btns.clone() {
        if inside_rect(mouse, rect) {
            app.view_mode = mode;
            return;
        }
    }
    if inside_rect(mouse, app.theme_btn) {
        let next = app.state.theme.toggled();
        let res = app.state.set_theme(next);
        note_save_outcome(app, res);
        return;
    }
    if inside_rect(mouse, app.search_btn) {
        open_global_search(app);
        return;
    }
    if inside_rect(mouse, app.help_btn) {
        app.show_help_overlay = true;
        return;
    }

    match app.view_mode {
        ViewMode::Problems => handle_problems_mouse_left(app, mouse),
        ViewMode::Patterns => handle_patterns_mouse_left(app, mouse),
        ViewMode::Templates => handle_templates_mouse_left(app, mouse),
    }
}

fn handle_problems_mouse_left(app: &mut App, mouse: MouseEvent) {
    if let Some(idx) = find_clicked_item(mouse, &app.problem_items.clone()) {
        app.current_problem_idx = idx;
        app.detail_scroll = 0;
        return;
    }
    if inside_rect(mouse, app.prob_add_btn) {
        open_problem_form(app);
    } else if inside_rect(mouse, app.prob_edit_btn) {
        open_problem_edit_form(app);
    } else if inside_rect(mouse, app.prob_delete_btn) {
        request_problem_delete(app);
    } else if inside_rect(mouse, app.prob_open_btn) {
        open_problem_link(app);
    } else if inside_rect(mouse, app.prob_export_btn) {
        export_problems(app);
    } else if inside_rect(mouse, app.prob_clear_filter_btn) {
        app.filter_pattern = None;
    }
}

fn handle_patterns_mouse_left(app: &mut App, mouse: MouseEvent) {
    if let Some(idx) = find_clicked_item(mouse, &app.pattern_items.clone()) {
        app.current_pattern_idx = idx;
        return;
    }
    if inside_rect(mouse, app.pat_add_btn) {
        open_pattern_form(app);
    } else if inside_rect(mouse, app.pat_delete_btn) {
        request_pattern_delete(app);
    } else if inside_rect(mouse, app.pat_inc_btn) {
        bump_selected_pattern(app, 1);
    } else if inside_rect(mouse, app.pat_dec_btn) {
        bump_selected_pattern(app, -1);
    } else if inside_rect(mouse, app.pat_filter_btn) {
        toggle_pattern_filter(app);
    } else if inside_rect(mouse, app.pat_copy_btn) {
        copy_pattern_list(app);
    }
}

fn handle_templates_mouse_left(app: &mut App, mouse: MouseEvent) {
    if let Some(idx) = find_clicked_item(mouse, &app.template_items.clone()) {
        if app.current_template_idx == idx {
            app.template_expanded = !app.template_expanded;
        }
        app.current_template_idx = idx;
        app.code_scroll = 0;
        return;
    }
    if inside_rect(mouse, app.tpl_add_btn) {
        open_template_form(app);
    } else if inside_rect(mouse, app.tpl_edit_btn) {
        open_template_edit_form(app);
    } else if inside_rect(mouse, app.tpl_delete_btn) {
        request_template_delete(app);
    } else if inside_rect(mouse, app.tpl_copy_btn) {
        copy_template_code(app);
    } else if inside_rect(mouse, app.tpl_status_btn) {
        cycle_template_status(app);
    } else if inside_rect(mouse, app.tpl_inc_btn) {
        bump_selected_template(app, 1);
    } else if inside_rect(mouse, app.tpl_dec_btn) {
        bump_selected_template(app, -1);
    }
}

fn handle_scroll(app: &mut App, mouse: MouseEvent, delta: i32) {
    if app.show_help_overlay {
        app.help_scroll = scroll_by(app.help_scroll, delta * 3);
        return;
    }
    if app.show_global_search {
        if delta < 0 {
            app.global_search_selected = app.global_search_selected.saturating_sub(1);
        } else if app.global_search_selected + 1 < app.global_search_results.len() {
            app.global_search_selected += 1;
        }
        return;
    }
    if app.is_editing() || app.pending_delete.is_some() {
        return;
    }
    match app.view_mode {
        ViewMode::Problems => {
            if inside_rect(mouse, app.detail_area) {
                app.detail_scroll = scroll_by(app.detail_scroll, delta * 3);
            } else {
                let len = app.visible_problem_indices().len();
                move_list_cursor(&mut app.current_problem_idx, len, delta);
                app.detail_scroll = 0;
            }
        }
        ViewMode::Patterns => {
            move_list_cursor(&mut app.current_pattern_idx, app.state.patterns.len(), delta);
        }
        ViewMode::Templates => {
            if inside_rect(mouse, app.code_area) {
                app.code_scroll = scroll_by(app.code_scroll, delta * 3);
            } else {
                move_list_cursor(
                    &mut app.current_template_idx,
                    app.state.templates.len(),
                    delta,
                );
                app.code_scroll = 0;
            }
        }
    }
}

fn scroll_by(value: u16, delta: i32) -> u16 {
    if delta >= 0 {
        value.saturating_add(delta as u16)
    } else {
        value.saturating_sub(delta.unsigned_abs() as u16)
    }
}

fn move_list_cursor(idx: &mut usize, len: usize, delta: i32) {
    if delta < 0 {
        *idx = idx.saturating_sub(1);
    } else if *idx + 1 < len {
        *idx += 1;
    }
}

// ============================================================================
// EDITORS - Form templates, formatting, and parsing
// ============================================================================

fn field_value(line: &str) -> String {
    line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string()
}

// Drop the "(options: ...)" hint that ships with the form template
fn strip_hint(value: &str) -> String {
    let mut out = value;
    if let Some(pos) = out.find("(options:") {
        out = &out[..pos];
    }
    out.trim().to_string()
}

fn push_section_lead(buffer: &mut Vec<String>, line: &str) {
    let after = line.splitn(2, ':').nth(1).unwrap_or("").trim_start();
    if !after.is_empty() {
        buffer.push(after.to_string());
    }
}

fn join_section(lines: Vec<String>) -> String {
    lines.join("\n").trim().to_string()
}

fn new_problem_editor_template(known_patterns: &[Pattern]) -> String {
    let known = if known_patterns.is_empty() {
        String::new()
    } else {
        let names = known_patterns
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("Known patterns: {names}\n")
    };
    format!(
        "Problem: \nDifficulty: \nStatus: Complete (options: Complete|In Progress|To Do)\nPatterns: \n{known}\nMetacognition:\n\nTakeaways:\n\nAnalysis:\n"
    )
}

fn format_problem_editor_content(problem: &Problem) -> String {
    format!(
        "Problem: {}\nDifficulty: {}\nStatus: {} (options: Complete|In Progress|To Do)\nPatterns: {}\n\nMetacognition:\n{}\n\nTakeaways:\n{}\n\nAnalysis:\n{}",
        problem.link.as_deref().unwrap_or(&problem.id),
        problem.difficulty,
        problem.status,
        problem.patterns.join(", "),
        problem.metacognition,
        problem.takeaways,
        problem.analysis,
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NoteSection {
    Metacognition,
    Takeaways,
    Analysis,
}

/// Parse the problem form back into a record. The submitted reference may be
/// a raw identifier or a URL; a URL is kept as the link and a short display
/// identifier is derived from it.
fn parse_problem_editor_content(
    input: &str,
    existing: Option<&Problem>,
) -> std::result::Result<Problem, String> {
    let mut problem = existing.cloned().unwrap_or_else(Problem::new);

    let mut submitted: Option<String> = None;
    let mut difficulty: Option<String> = None;
    let mut status: Option<ProblemStatus> = None;
    let mut patterns: Option<Vec<String>> = None;

    let mut section: Option<NoteSection> = None;
    let mut metacognition: Vec<String> = Vec::new();
    let mut takeaways: Vec<String> = Vec::new();
    let mut analysis: Vec<String> = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();

        if lower.starts_with("metacognition:") {
            section = Some(NoteSection::Metacognition);
            push_section_lead(&mut metacognition, line);
            continue;
        }
        if lower.starts_with("takeaways:") {
            section = Some(NoteSection::Takeaways);
            push_section_lead(&mut takeaways, line);
            continue;
        }
        if lower.starts_with("analysis:") {
            section = Some(NoteSection::Analysis);
            push_section_lead(&mut analysis, line);
            continue;
        }

        if let Some(active) = section {
            let buffer = match active {
                NoteSection::Metacognition => &mut metacognition,
                NoteSection::Takeaways => &mut takeaways,
                NoteSection::Analysis => &mut analysis,
            };
            buffer.push(line.to_string());
            continue;
        }

        if lower.starts_with("problem:") {
            submitted = Some(field_value(line));
        } else if lower.starts_with("difficulty:") {
            difficulty = Some(field_value(line));
        } else if lower.starts_with("status:") {
            status = Some(classify_status(&strip_hint(&field_value(line))));
        } else if lower.starts_with("patterns:") {
            let value = strip_hint(&field_value(line));
            patterns = Some(
                value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
    }

    let submitted = submitted.unwrap_or_default();
    if submitted.is_empty() {
        return Err("Problem is required. Enter an identifier or a URL.".to_string());
    }

    problem.id = derive_problem_id(&submitted);
    problem.link = split_url(&submitted).map(|_| submitted.clone());
    if let Some(difficulty) = difficulty {
        problem.difficulty = difficulty;
    }
    if let Some(status) = status {
        problem.status = status;
    }
    if let Some(patterns) = patterns {
        problem.patterns = patterns;
    }
    problem.metacognition = join_section(metacognition);
    problem.takeaways = join_section(takeaways);
    problem.analysis = join_section(analysis);

    Ok(problem)
}

fn new_pattern_editor_template() -> String {
    "Name: ".to_string()
}

fn parse_pattern_editor_content(input: &str) -> String {
    for line in input.lines() {
        let lower = line.trim().to_lowercase();
        if lower.starts_with("name:") {
            return field_value(line);
        }
    }
    input.trim().to_string()
}

fn new_template_editor_template() -> String {
    "Title: \nStatus: to-do (options: to-do|in-progress|revise|memorized)\n\nCode:\n".to_string()
}

fn format_template_editor_content(template: &Template) -> String {
    format!(
        "Title: {}\nStatus: {} (options: to-do|in-progress|revise|memorized)\n\nCode:\n{}",
        template.title, template.status, template.code
    )
}

/// Everything after the `Code:` header is the verbatim snippet; it is never
/// parsed or executed.
fn parse_template_editor_content(
    input: &str,
    existing: Option<&Template>,
) -> std::result::Result<Template, String> {
    let mut template = existing.cloned().unwrap_or_else(|| Template::new(""));

    let mut title: Option<String> = None;
    let mut status: Option<TemplateStatus> = None;
    let mut code_lines: Vec<String> = Vec::new();
    let mut in_code = false;

    for line in input.lines() {
        if in_code {
            code_lines.push(line.to_string());
            continue;
        }
        let lower = line.trim().to_lowercase();
        if lower.starts_with("code:") {
            let after = line.splitn(2, ':').nth(1).unwrap_or("");
            if !after.trim().is_empty() {
                code_lines.push(after.trim_start().to_string());
            }
            in_code = true;
            continue;
        }
        if lower.starts_with("title:") {
            title = Some(field_value(line));
            continue;
        }
        if lower.starts_with("status:") {
            let value = strip_hint(&field_value(line));
            if value.is_empty() {
                status = Some(TemplateStatus::default());
            } else {
                status = Some(value.parse::<TemplateStatus>()?);
            }
        }
    }

    let title = title.unwrap_or_default();
    if title.is_empty() {
        return Err("Title is required.".to_string());
    }

    template.title = title;
    if let Some(status) = status {
        template.status = status;
    }
    template.code = code_lines.join("\n").trim_end().to_string();

    Ok(template)
}

// ============================================================================
// RENDERING (DRAWING) - All UI output functions
// ============================================================================

struct Palette {
    bg: Color,
    fg: Color,
    dim: Color,
    border: Color,
    accent: Color,
    selection_bg: Color,
    selection_fg: Color,
    easy: Color,
    medium: Color,
    hard: Color,
    complete: Color,
    in_progress: Color,
    todo: Color,
    warn: Color,
    danger: Color,
    ok: Color,
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Dark => Palette {
            bg: Color::Black,
            fg: Color::White,
            dim: Color::DarkGray,
            border: Color::DarkGray,
            accent: Color::Cyan,
            selection_bg: Color::Blue,
            selection_fg: Color::White,
            easy: Color::Green,
            medium: Color::Yellow,
            hard: Color::Red,
            complete: Color::Green,
            in_progress: Color::Yellow,
            todo: Color::DarkGray,
            warn: Color::Yellow,
            danger: Color::Red,
            ok: Color::Green,
        },
        Theme::Light => Palette {
            bg: Color::White,
            fg: Color::Black,
            dim: Color::Gray,
            border: Color::Gray,
            accent: Color::Blue,
            selection_bg: Color::Blue,
            selection_fg: Color::White,
            easy: Color::Green,
            medium: Color::Rgb(170, 110, 0),
            hard: Color::Red,
            complete: Color::Green,
            in_progress: Color::Rgb(170, 110, 0),
            todo: Color::DarkGray,
            warn: Color::Rgb(170, 110, 0),
            danger: Color::Red,
            ok: Color::Green,
        },
    }
}

fn difficulty_color(band: DifficultyBand, pal: &Palette) -> Color {
    match band {
        DifficultyBand::Easy => pal.easy,
        DifficultyBand::Medium => pal.medium,
        DifficultyBand::Hard => pal.hard,
        DifficultyBand::Unknown => pal.fg,
    }
}

fn status_color(status: ProblemStatus, pal: &Palette) -> Color {
    match status {
        ProblemStatus::Complete => pal.complete,
        ProblemStatus::InProgress => pal.in_progress,
        ProblemStatus::ToDo => pal.todo,
    }
}

fn template_status_color(status: TemplateStatus, pal: &Palette) -> Color {
    match status {
        TemplateStatus::ToDo => pal.todo,
        TemplateStatus::InProgress => pal.in_progress,
        TemplateStatus::Revise => pal.warn,
        TemplateStatus::Memorized => pal.complete,
    }
}

fn list_block(title: &str, pal: &Palette) -> Block<'static> {
    Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(pal.border))
}

fn draw(frame: &mut ratatui::Frame, app: &mut App) {
    app.validate_indices();
    let pal = palette(app.state.theme);

    // Paint the whole frame in the theme's base colors first
    frame.render_widget(
        Block::default().style(Style::default().bg(pal.bg).fg(pal.fg)),
        frame.size(),
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(frame.size());

    draw_nav_bar(frame, app, chunks[0]);

    match app.view_mode {
        ViewMode::Problems => draw_problems_view(frame, app, chunks[1]),
        ViewMode::Patterns => draw_patterns_view(frame, app, chunks[1]),
        ViewMode::Templates => draw_templates_view(frame, app, chunks[1]),
    }

    draw_status_bar(frame, app, chunks[2]);

    if app.is_editing() {
        draw_form_modal(frame, app);
    }
    if app.pending_delete.is_some() {
        draw_confirm_popup(frame, app);
    }
    if app.show_validation_error {
        draw_validation_error_popup(frame, app);
    }
    if app.show_startup_warning {
        draw_startup_warning_popup(frame, app);
    }
    if app.show_global_search {
        draw_global_search_overlay(frame, app);
    }
    if app.show_help_overlay {
        draw_help_overlay(frame, app);
    }
}

fn draw_nav_bar(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(15),
            Constraint::Min(0),
            Constraint::Length(12),
            Constraint::Length(16),
            Constraint::Length(9),
        ])
        .split(area);

    app.view_mode_btns.clear();
    let tabs = [
        (ViewMode::Problems, "1 Problems"),
        (ViewMode::Patterns, "2 Patterns"),
        (ViewMode::Templates, "3 Templates"),
    ];
    for (i, (mode, label)) in tabs.iter().enumerate() {
        render_tab(frame, label, chunks[i], app.view_mode == *mode, &pal);
        app.view_mode_btns.push((*mode, chunks[i]));
    }

    render_button(frame, "Search", chunks[4], pal.accent);
    app.search_btn = chunks[4];
    let theme_label = format!("Theme: {}", app.state.theme.label());
    render_button(frame, &theme_label, chunks[5], pal.accent);
    app.theme_btn = chunks[5];
    render_button(frame, "? Help", chunks[6], pal.dim);
    app.help_btn = chunks[6];
}

fn render_tab(frame: &mut ratatui::Frame, text: &str, area: Rect, active: bool, pal: &Palette) {
    let style = if active {
        Style::default()
            .fg(pal.selection_fg)
            .bg(pal.selection_bg)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(pal.fg)
    };
    let tab = Paragraph::new(text.to_string())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.border)),
        )
        .alignment(Alignment::Center)
        .style(style);
    frame.render_widget(tab, area);
}

fn problem_row(problem: &Problem, pal: &Palette) -> Line<'static> {
    let id = pad_column(&problem.id, 18);
    let difficulty = pad_column(&problem.difficulty, 10);
    let status = pad_column(&problem.status.to_string(), 13);
    let patterns = problem.patterns.join(", ");
    Line::from(vec![
        Span::raw(id),
        Span::styled(
            difficulty,
            Style::default().fg(difficulty_color(classify_difficulty(&problem.difficulty), pal)),
        ),
        Span::styled(status, Style::default().fg(status_color(problem.status, pal))),
        Span::styled(patterns, Style::default().fg(pal.dim)),
    ])
}

fn draw_problems_view(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(body[0]);

    app.problem_items.clear();
    let visible = app.visible_problem_indices();

    let title = match &app.filter_pattern {
        Some((_, name)) => format!("Problems [pattern: {name}] ({})", visible.len()),
        None => format!("Problems ({})", visible.len()),
    };

    if visible.is_empty() {
        let help = Paragraph::new(problems_help_lines())
            .block(list_block(&title, &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(help, left[0]);
    } else {
        let inner_y = left[0].y + 1;
        let viewport = left[0].height.saturating_sub(2).max(1) as usize;
        // Keep the selection on screen in long lists
        let offset = app
            .current_problem_idx
            .saturating_sub(viewport.saturating_sub(1));
        let mut items: Vec<ListItem> = Vec::new();
        for (row, display_idx) in (offset..visible.len()).take(viewport).enumerate() {
            let problem = &app.state.problems[visible[display_idx]];
            let line = problem_row(problem, &pal);
            let style = if display_idx == app.current_problem_idx {
                Style::default().bg(pal.selection_bg).fg(pal.selection_fg)
            } else {
                Style::default()
            };
            items.push(ListItem::new(line).style(style));
            app.problem_items.push((
                display_idx,
                Rect {
                    x: left[0].x,
                    y: inner_y + row as u16,
                    width: left[0].width,
                    height: 1,
                },
            ));
        }
        let list = List::new(items).block(list_block(&title, &pal));
        frame.render_widget(list, left[0]);
    }

    let buttons = split_equal_horizontal(left[1], 6);
    render_button(frame, "New", buttons[0], pal.ok);
    app.prob_add_btn = buttons[0];
    render_button(frame, "Edit", buttons[1], pal.accent);
    app.prob_edit_btn = buttons[1];
    render_button(frame, "Delete", buttons[2], pal.danger);
    app.prob_delete_btn = buttons[2];
    render_button(frame, "Open", buttons[3], pal.accent);
    app.prob_open_btn = buttons[3];
    render_button(frame, "Export", buttons[4], pal.accent);
    app.prob_export_btn = buttons[4];
    render_button(frame, "No Filter", buttons[5], pal.warn);
    app.prob_clear_filter_btn = buttons[5];

    draw_problem_details(frame, app, body[1]);
}

fn draw_problem_details(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    app.detail_area = area;

    let Some(problem) = app.selected_problem() else {
        let para = Paragraph::new("Select a problem to see its notes.")
            .block(list_block("Details", &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(para, area);
        return;
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(vec![
        Span::styled("Identifier: ", Style::default().fg(pal.dim)),
        Span::styled(
            problem.id.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ]));
    if let Some(link) = &problem.link {
        lines.push(Line::from(vec![
            Span::styled("Link: ", Style::default().fg(pal.dim)),
            Span::styled(link.clone(), Style::default().fg(pal.accent)),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled("Difficulty: ", Style::default().fg(pal.dim)),
        Span::styled(
            problem.difficulty.clone(),
            Style::default().fg(difficulty_color(
                classify_difficulty(&problem.difficulty),
                &pal,
            )),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Status: ", Style::default().fg(pal.dim)),
        Span::styled(
            problem.status.to_string(),
            Style::default().fg(status_color(problem.status, &pal)),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Patterns: ", Style::default().fg(pal.dim)),
        Span::raw(problem.patterns.join(", ")),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Added: ", Style::default().fg(pal.dim)),
        Span::raw(problem.added_on.to_string()),
    ]));
    lines.push(Line::from(""));

    for (heading, content) in [
        ("Metacognition", &problem.metacognition),
        ("Takeaways", &problem.takeaways),
        ("Analysis", &problem.analysis),
    ] {
        lines.push(Line::from(Span::styled(
            heading,
            Style::default().fg(pal.accent).add_modifier(Modifier::BOLD),
        )));
        if content.is_empty() {
            lines.push(Line::from(Span::styled("-", Style::default().fg(pal.dim))));
        } else {
            for text_line in content.lines() {
                lines.push(Line::from(text_line.to_string()));
            }
        }
        lines.push(Line::from(""));
    }

    let para = Paragraph::new(lines)
        .block(list_block("Details (PgUp/PgDn: scroll)", &pal))
        .wrap(Wrap { trim: false })
        .scroll((app.detail_scroll, 0));
    frame.render_widget(para, area);
}

fn draw_patterns_view(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(body[0]);

    app.pattern_items.clear();
    let title = format!("Patterns ({})", app.state.patterns.len());

    if app.state.patterns.is_empty() {
        let help = Paragraph::new(patterns_help_lines())
            .block(list_block(&title, &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(help, left[0]);
    } else {
        let inner_y = left[0].y + 1;
        let viewport = left[0].height.saturating_sub(2).max(1) as usize;
        let offset = app
            .current_pattern_idx
            .saturating_sub(viewport.saturating_sub(1));
        let mut items: Vec<ListItem> = Vec::new();
        for (row, idx) in (offset..app.state.patterns.len()).take(viewport).enumerate() {
            let pattern = &app.state.patterns[idx];
            let filtering = app
                .filter_pattern
                .as_ref()
                .is_some_and(|(uid, _)| *uid == pattern.uid);
            let marker = if filtering { "  [filtering]" } else { "" };
            let line = Line::from(vec![
                Span::raw(pad_column(&pattern.name, 30)),
                Span::styled(
                    format!("x{}", pattern.frequency),
                    Style::default().fg(pal.accent),
                ),
                Span::styled(marker.to_string(), Style::default().fg(pal.warn)),
            ]);
            let style = if idx == app.current_pattern_idx {
                Style::default().bg(pal.selection_bg).fg(pal.selection_fg)
            } else {
                Style::default()
            };
            items.push(ListItem::new(line).style(style));
            app.pattern_items.push((
                idx,
                Rect {
                    x: left[0].x,
                    y: inner_y + row as u16,
                    width: left[0].width,
                    height: 1,
                },
            ));
        }
        let list = List::new(items).block(list_block(&title, &pal));
        frame.render_widget(list, left[0]);
    }

    let buttons = split_equal_horizontal(left[1], 6);
    render_button(frame, "Add", buttons[0], pal.ok);
    app.pat_add_btn = buttons[0];
    render_button(frame, "Delete", buttons[1], pal.danger);
    app.pat_delete_btn = buttons[1];
    render_button(frame, "+1", buttons[2], pal.accent);
    app.pat_inc_btn = buttons[2];
    render_button(frame, "-1", buttons[3], pal.accent);
    app.pat_dec_btn = buttons[3];
    render_button(frame, "Filter", buttons[4], pal.accent);
    app.pat_filter_btn = buttons[4];
    render_button(frame, "Copy", buttons[5], pal.accent);
    app.pat_copy_btn = buttons[5];

    draw_pattern_usage(frame, app, body[1]);
}

// Right panel: which problems use the highlighted pattern
fn draw_pattern_usage(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);

    let Some(pattern) = app.selected_pattern() else {
        let para = Paragraph::new("Select a pattern to see where it is used.")
            .block(list_block("Usage", &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(para, area);
        return;
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(vec![
        Span::styled("Pattern: ", Style::default().fg(pal.dim)),
        Span::styled(
            pattern.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Frequency: ", Style::default().fg(pal.dim)),
        Span::raw(format!("x{}", pattern.frequency)),
    ]));
    lines.push(Line::from(""));

    let users: Vec<&Problem> = app
        .state
        .problems
        .iter()
        .filter(|p| p.patterns.iter().any(|name| name == &pattern.name))
        .collect();
    lines.push(Line::from(Span::styled(
        format!("Used by {} problems", users.len()),
        Style::default().fg(pal.accent).add_modifier(Modifier::BOLD),
    )));
    for problem in users {
        lines.push(Line::from(vec![
            Span::raw(format!("  {}  ", problem.id)),
            Span::styled(
                problem.status.to_string(),
                Style::default().fg(status_color(problem.status, &pal)),
            ),
        ]));
    }

    let para = Paragraph::new(lines)
        .block(list_block("Usage (Enter: filter problems)", &pal))
        .wrap(Wrap { trim: false });
    frame.render_widget(para, area);
}

fn draw_templates_view(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)])
        .split(body[0]);

    app.template_items.clear();
    let title = format!("Templates ({})", app.state.templates.len());

    if app.state.templates.is_empty() {
        let help = Paragraph::new(templates_help_lines())
            .block(list_block(&title, &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(help, left[0]);
    } else {
        let inner_y = left[0].y + 1;
        let viewport = left[0].height.saturating_sub(2).max(1) as usize;
        let offset = app
            .current_template_idx
            .saturating_sub(viewport.saturating_sub(1));
        let mut items: Vec<ListItem> = Vec::new();
        for (row, idx) in (offset..app.state.templates.len()).take(viewport).enumerate() {
            let template = &app.state.templates[idx];
            let line = Line::from(vec![
                Span::raw(pad_column(&template.title, 22)),
                Span::styled(
                    pad_column(&format!("[{}]", template.status), 14),
                    Style::default().fg(template_status_color(template.status, &pal)),
                ),
                Span::styled(
                    format!("x{}", template.frequency),
                    Style::default().fg(pal.accent),
                ),
            ]);
            let style = if idx == app.current_template_idx {
                Style::default().bg(pal.selection_bg).fg(pal.selection_fg)
            } else {
                Style::default()
            };
            items.push(ListItem::new(line).style(style));
            app.template_items.push((
                idx,
                Rect {
                    x: left[0].x,
                    y: inner_y + row as u16,
                    width: left[0].width,
                    height: 1,
                },
            ));
        }
        let list = List::new(items).block(list_block(&title, &pal));
        frame.render_widget(list, left[0]);
    }

    let buttons = split_equal_horizontal(left[1], 7);
    render_button(frame, "New", buttons[0], pal.ok);
    app.tpl_add_btn = buttons[0];
    render_button(frame, "Edit", buttons[1], pal.accent);
    app.tpl_edit_btn = buttons[1];
    render_button(frame, "Delete", buttons[2], pal.danger);
    app.tpl_delete_btn = buttons[2];
    render_button(frame, "Copy", buttons[3], pal.accent);
    app.tpl_copy_btn = buttons[3];
    render_button(frame, "Status", buttons[4], pal.accent);
    app.tpl_status_btn = buttons[4];
    render_button(frame, "+1", buttons[5], pal.accent);
    app.tpl_inc_btn = buttons[5];
    render_button(frame, "-1", buttons[6], pal.accent);
    app.tpl_dec_btn = buttons[6];

    draw_template_code(frame, app, body[1]);
}

fn draw_template_code(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    app.code_area = area;

    let Some(template) = app.selected_template() else {
        let para = Paragraph::new("Select a template to see its code.")
            .block(list_block("Code", &pal))
            .style(Style::default().fg(pal.dim));
        frame.render_widget(para, area);
        return;
    };

    let title = format!(
        "{} [{}] (x{}) | Enter: expand, c: copy",
        template.title, template.status, template.frequency
    );

    if app.template_expanded {
        let lines: Vec<Line> = template
            .code
            .lines()
            .map(|l| Line::from(l.to_string()))
            .collect();
        let para = Paragraph::new(lines)
            .block(list_block(&title, &pal))
            .scroll((app.code_scroll, 0));
        frame.render_widget(para, area);
    } else {
        let first = template.code.lines().next().unwrap_or("").to_string();
        let preview = truncate_chars(&first, 100);
        let lines = vec![
            Line::from(preview),
            Line::from(""),
            Line::from(Span::styled(
                "Press Enter to show the full code",
                Style::default().fg(pal.dim).italic(),
            )),
        ];
        let para = Paragraph::new(lines).block(list_block(&title, &pal));
        frame.render_widget(para, area);
    }
}

fn draw_status_bar(frame: &mut ratatui::Frame, app: &mut App, area: Rect) {
    let pal = palette(app.state.theme);
    let (text, style) = match &app.status_message {
        Some(message) => (message.clone(), Style::default().fg(pal.warn)),
        None => {
            let hints = match app.view_mode {
                ViewMode::Problems => {
                    " q quit | n new | e edit | d delete | o/Enter open link | x export | c clear filter | t theme | Ctrl+F search | ? help"
                }
                ViewMode::Patterns => {
                    " q quit | n add | d delete | Enter/f filter problems | +/- frequency | c copy list | t theme | Ctrl+F search | ? help"
                }
                ViewMode::Templates => {
                    " q quit | n new | e edit | d delete | Enter expand | s status | +/- frequency | c copy code | t theme | ? help"
                }
            };
            (hints.to_string(), Style::default().fg(pal.dim))
        }
    };
    frame.render_widget(Paragraph::new(text).style(style), area);
}

fn draw_form_modal(frame: &mut ratatui::Frame, app: &mut App) {
    let size = frame.size();
    let area = get_popup_area(size.width, size.height, 74, 76);
    app.form_area = area;
    let title = match app.edit_target {
        EditTarget::ProblemNew => "Add Problem (Ctrl+S: save, Esc: cancel)",
        EditTarget::ProblemEdit => "Edit Problem (Ctrl+S: save, Esc: cancel)",
        EditTarget::PatternNew => "Add Pattern (Ctrl+S: save, Esc: cancel)",
        EditTarget::TemplateNew => "Add Template (Ctrl+S: save, Esc: cancel)",
        EditTarget::TemplateEdit => "Edit Template (Ctrl+S: save, Esc: cancel)",
        EditTarget::None => return,
    };
    frame.render_widget(Clear, area);
    render_textarea_editor(frame, app, area, title);
}

fn textarea_lines_with_cursor(app: &App, height: u16, pal: &Palette) -> Vec<Line<'static>> {
    let (cursor_row, cursor_col) = app.textarea.cursor();
    let mut lines = Vec::new();
    let text_lines = app.textarea.lines();

    if text_lines.is_empty() {
        lines.push(Line::from("|"));
        return lines;
    }

    for (idx, line) in text_lines.iter().enumerate() {
        if idx == cursor_row {
            let char_col = cursor_col.min(line.chars().count());
            let mut new_line = String::new();
            for (i, c) in line.chars().enumerate() {
                if i == char_col {
                    new_line.push('|');
                }
                new_line.push(c);
            }
            if char_col == line.chars().count() {
                new_line.push('|');
            }
            lines.push(Line::from(Span::styled(
                new_line,
                Style::default().fg(pal.accent),
            )));
        } else {
            lines.push(Line::from(line.clone()));
        }
    }

    let view_height = height.max(1) as usize;
    if lines.len() > view_height {
        let start = cursor_row.saturating_sub(view_height.saturating_sub(1));
        let end = (start + view_height).min(lines.len());
        lines[start..end].to_vec()
    } else {
        lines
    }
}

fn render_textarea_editor(frame: &mut ratatui::Frame, app: &App, area: Rect, title: &str) {
    let pal = palette(app.state.theme);
    let inner_height = area.height.saturating_sub(2); // account for borders
    let lines_display = textarea_lines_with_cursor(app, inner_height, &pal);
    let panel = Paragraph::new(lines_display)
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(pal.accent)),
        )
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(pal.fg).bg(pal.bg));
    frame.render_widget(panel, area);
}

fn draw_confirm_popup(frame: &mut ratatui::Frame, app: &mut App) {
    let Some(pending) = &app.pending_delete else {
        return;
    };
    let message = format!("Delete {}?\nThis cannot be undone.", pending.label);

    let pal = palette(app.state.theme);
    let size = frame.size();
    let area = get_popup_area(size.width, size.height, 48, 26);

    let block = Block::default()
        .title("[?] Confirm Delete")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .style(Style::default().fg(pal.danger).bg(pal.bg));
    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(2), Constraint::Length(3)])
        .split(inner);

    let para = Paragraph::new(message)
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center)
        .style(Style::default().fg(pal.fg));
    frame.render_widget(para, chunks[0]);

    let buttons = split_equal_horizontal(chunks[1], 2);
    render_button(frame, "Yes (y)", buttons[0], pal.danger);
    app.confirm_yes_btn = buttons[0];
    render_button(frame, "No (n)", buttons[1], pal.ok);
    app.confirm_no_btn = buttons[1];
}

fn draw_validation_error_popup(frame: &mut ratatui::Frame, app: &App) {
    let pal = palette(app.state.theme);
    let size = frame.size();
    let area = get_popup_area(size.width, size.height, 70, 38);

    let block = Block::default()
        .title("[!] Validation Error")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .style(Style::default().fg(pal.danger).bg(pal.bg));

    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(inner);

    let para = Paragraph::new(app.validation_error_message.clone())
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center)
        .style(Style::default().fg(pal.fg));
    frame.render_widget(para, chunks[0]);

    let hint = Paragraph::new("Press Esc to dismiss")
        .alignment(Alignment::Center)
        .style(Style::default().fg(pal.dim).italic());
    frame.render_widget(hint, chunks[1]);
}

fn draw_startup_warning_popup(frame: &mut ratatui::Frame, app: &App) {
    let pal = palette(app.state.theme);
    let size = frame.size();
    let area = get_popup_area(size.width, size.height, 72, 46);

    let block = Block::default()
        .title("[!] Storage Warning")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .style(Style::default().fg(pal.warn).bg(pal.bg));

    let inner = block.inner(area);
    frame.render_widget(Clear, area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(inner);

    let mut lines: Vec<Line> = Vec::new();
    for warning in &app.startup_warnings {
        lines.push(Line::from(warning.clone()));
        lines.push(Line::from(""));
    }
    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(pal.fg));
    frame.render_widget(para, chunks[0]);

    let hint = Paragraph::new("Press Esc to dismiss")
        .alignment(Alignment::Center)
        .style(Style::default().fg(pal.dim).italic());
    frame.render_widget(hint, chunks[1]);
}

fn draw_global_search_overlay(frame: &mut ratatui::Frame, app: &mut App) {
    let pal = palette(app.state.theme);
    let size = frame.size();
    let width = size.width.saturating_mul(3) / 4;
    let height = size.height.saturating_mul(3) / 4;
    let x = size.x + (size.width.saturating_sub(width)) / 2;
    let y = size.y + (size.height.saturating_sub(height)) / 2;
    let area = Rect {
        x,
        y,
        width,
        height,
    };

    frame.render_widget(Clear, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(area);

    let query_text = if app.global_search_query.is_empty() {
        "Type to search problems, patterns, templates".to_string()
    } else {
        app.global_search_query.clone()
    };
    let input_widget = Paragraph::new(query_text)
        .block(
            Block::default()
                .title("Search (Enter: jump, Esc: close)")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.accent)),
        )
        .style(Style::default().fg(pal.fg).bg(pal.bg));
    frame.render_widget(input_widget, layout[0]);

    app.search_result_items.clear();
    let list_area = layout[1];
    let inner_y = list_area.y + 1;
    let viewport = list_area.height.saturating_sub(2).max(1) as usize;
    let mut items: Vec<ListItem> = Vec::new();
    for (row, hit) in app.global_search_results.iter().take(viewport).enumerate() {
        let line = Line::from(vec![
            Span::styled(
                hit.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(hit.detail.clone(), Style::default().fg(pal.dim)),
        ]);
        let style = if row == app.global_search_selected {
            Style::default().bg(pal.selection_bg).fg(pal.selection_fg)
        } else {
            Style::default().bg(pal.bg)
        };
        items.push(ListItem::new(line).style(style));
        app.search_result_items.push((
            row,
            Rect {
                x: list_area.x,
                y: inner_y + row as u16,
                width: list_area.width,
                height: 1,
            },
        ));
    }
    let results_title = format!("Results ({})", app.global_search_results.len());
    let list = List::new(items)
        .block(
            Block::default()
                .title(results_title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.border)),
        )
        .style(Style::default().bg(pal.bg).fg(pal.fg));
    frame.render_widget(list, list_area);
}

fn draw_help_overlay(frame: &mut ratatui::Frame, app: &App) {
    let pal = palette(app.state.theme);
    let size = frame.size();
    let width = size.width.saturating_mul(3) / 4;
    let height = size.height.saturating_mul(3) / 4;
    let x = size.x + (size.width.saturating_sub(width)) / 2;
    let y = size.y + (size.height.saturating_sub(height)) / 2;
    let area = Rect {
        x,
        y,
        width,
        height,
    };

    frame.render_widget(Clear, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(area);

    let query_text = if app.help_search_query.is_empty() {
        "Type to filter tips".to_string()
    } else {
        app.help_search_query.clone()
    };
    let input_widget = Paragraph::new(query_text)
        .block(
            Block::default()
                .title("Quick Help (Esc to close)")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.accent)),
        )
        .style(Style::default().fg(pal.fg).bg(pal.bg));
    frame.render_widget(input_widget, layout[0]);

    let query = app.help_search_query.to_lowercase();
    let filtered: Vec<&HelpTopic> = HELP_TOPICS
        .iter()
        .filter(|topic| {
            if query.trim().is_empty() {
                return true;
            }
            topic.title.to_lowercase().contains(&query)
                || topic.detail.to_lowercase().contains(&query)
        })
        .collect();

    let mut lines: Vec<Line> = Vec::new();
    for topic in filtered {
        lines.push(Line::from(Span::styled(
            topic.title,
            Style::default().fg(pal.warn).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(topic.detail));
        lines.push(Line::from(""));
    }

    let body = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.border)),
        )
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(pal.fg).bg(pal.bg))
        .scroll((app.help_scroll, 0));
    frame.render_widget(body, layout[1]);
}

// ============================================================================
// UTILITIES - Clipboard, export, search, layout helpers
// ============================================================================

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(text.to_string())?;
    Ok(())
}

fn export_problems_csv(root: &Path, problems: &[Problem]) -> Result<PathBuf> {
    let path = root.join("problems.csv");
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("could not create {}", path.display()))?;
    writer.write_record([
        "id",
        "link",
        "difficulty",
        "status",
        "patterns",
        "metacognition",
        "takeaways",
        "analysis",
        "added_on",
    ])?;
    for problem in problems {
        let status = problem.status.to_string();
        let patterns = problem.patterns.join("; ");
        let added = problem.added_on.to_string();
        writer.write_record([
            problem.id.as_str(),
            problem.link.as_deref().unwrap_or(""),
            problem.difficulty.as_str(),
            status.as_str(),
            patterns.as_str(),
            problem.metacognition.as_str(),
            problem.takeaways.as_str(),
            problem.analysis.as_str(),
            added.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

fn fuzzy_score(query: &str, candidate: &str) -> i32 {
    let lower = candidate.to_lowercase();
    let mut score = (jaro_winkler(query, &lower) * 1000.0) as i32;
    if lower.contains(query) {
        score += 400;
    }
    score
}

fn best_score<'a>(query: &str, candidates: impl IntoIterator<Item = &'a str>) -> i32 {
    if query.is_empty() {
        return 1000;
    }
    candidates
        .into_iter()
        .map(|candidate| fuzzy_score(query, candidate))
        .max()
        .unwrap_or(0)
}

const SEARCH_SCORE_CUTOFF: i32 = 650;

fn run_global_search(app: &mut App) {
    let query = app.global_search_query.trim().to_lowercase();
    let mut hits: Vec<SearchHit> = Vec::new();

    for (idx, problem) in app.state.problems.iter().enumerate() {
        let joined = problem.patterns.join(" ");
        let score = best_score(
            &query,
            [
                problem.id.as_str(),
                joined.as_str(),
                problem.analysis.as_str(),
                problem.takeaways.as_str(),
            ],
        );
        if score >= SEARCH_SCORE_CUTOFF {
            hits.push(SearchHit {
                title: problem.id.clone(),
                detail: format!("problem | {} | {}", problem.status, truncate_chars(&joined, 40)),
                target: SearchTarget::Problem(idx),
                score,
            });
        }
    }
    for (idx, pattern) in app.state.patterns.iter().enumerate() {
        let score = best_score(&query, [pattern.name.as_str()]);
        if score >= SEARCH_SCORE_CUTOFF {
            hits.push(SearchHit {
                title: pattern.name.clone(),
                detail: format!("pattern | x{}", pattern.frequency),
                target: SearchTarget::Pattern(idx),
                score,
            });
        }
    }
    for (idx, template) in app.state.templates.iter().enumerate() {
        let score = best_score(&query, [template.title.as_str(), template.code.as_str()]);
        if score >= SEARCH_SCORE_CUTOFF {
            hits.push(SearchHit {
                title: template.title.clone(),
                detail: format!("template | {} | x{}", template.status, template.frequency),
                target: SearchTarget::Template(idx),
                score,
            });
        }
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(50);
    app.global_search_results = hits;
    if app.global_search_selected >= app.global_search_results.len() {
        app.global_search_selected = 0;
    }
}

fn inside_rect(mouse: MouseEvent, rect: Rect) -> bool {
    mouse.row >= rect.y
        && mouse.row < rect.y + rect.height
        && mouse.column >= rect.x
        && mouse.column < rect.x + rect.width
}

// Helper: Find clicked item index from mouse event
fn find_clicked_item(mouse: MouseEvent, items: &[(usize, Rect)]) -> Option<usize> {
    items
        .iter()
        .find(|(_, rect)| inside_rect(mouse, *rect))
        .map(|(idx, _)| *idx)
}

/// Get centered popup area for overlays
fn get_popup_area(
    frame_width: u16,
    frame_height: u16,
    width_percent: u16,
    height_percent: u16,
) -> Rect {
    let width = frame_width.saturating_mul(width_percent) / 100;
    let height = frame_height.saturating_mul(height_percent) / 100;
    let x = (frame_width.saturating_sub(width)) / 2;
    let y = (frame_height.saturating_sub(height)) / 2;
    Rect {
        x,
        y,
        width,
        height,
    }
}

// Helper: Split a rectangular area into N equal horizontal chunks
fn split_equal_horizontal(area: Rect, count: usize) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }
    let pct = 100 / count.max(1) as u16;
    let mut constraints = Vec::with_capacity(count);
    for _ in 0..count {
        constraints.push(Constraint::Percentage(pct));
    }
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area)
        .to_vec()
}

// Helper: Render button with color
fn render_button(frame: &mut ratatui::Frame, text: &str, area: Rect, color: Color) {
    let btn = Paragraph::new(text.to_string())
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center)
        .style(Style::default().fg(color));
    frame.render_widget(btn, area);
}

fn pad_column(text: &str, width: usize) -> String {
    let truncated = truncate_chars(text, width.saturating_sub(1));
    format!("{truncated:<width$}")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn problems_help_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from("PROBLEMS - PRACTICE LOG"),
        Line::from(""),
        Line::from("Track every problem you attempt:"),
        Line::from("  - Paste a URL (LeetCode/Codeforces/AtCoder) or type an identifier"),
        Line::from("  - Record difficulty, status, and the patterns you used"),
        Line::from("  - Keep metacognition, takeaways, and analysis notes"),
        Line::from(""),
        Line::from("How to use:"),
        Line::from("  1. Press n (or click 'New') to add a problem"),
        Line::from("  2. Fill the fields, Ctrl+S saves, Esc cancels"),
        Line::from("  3. o or Enter opens the stored link in your browser"),
        Line::from("  4. Pick a pattern on the Patterns page to filter this list"),
    ]
}

fn patterns_help_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from("PATTERNS - TECHNIQUE CATALOG"),
        Line::from(""),
        Line::from("Name the techniques you keep reusing (dp, two pointers, ...):"),
        Line::from("  - Names are unique; adding an existing name does nothing"),
        Line::from("  - +/- tracks how often a pattern comes up"),
        Line::from("  - Enter filters the problems list to the selected pattern"),
        Line::from(""),
        Line::from("How to use:"),
        Line::from("  1. Press n (or click 'Add') to add a pattern"),
        Line::from("  2. Tag problems with pattern names in the problem form"),
        Line::from("  3. c copies the whole list to the clipboard"),
    ]
}

fn templates_help_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from("TEMPLATES - CODE SNIPPETS"),
        Line::from(""),
        Line::from("Save the boilerplate you rewrite before every contest:"),
        Line::from("  - A template is a title plus a verbatim code blob"),
        Line::from("  - Learning status: to-do, in-progress, revise, memorized"),
        Line::from("  - +/- tracks how often you reached for it"),
        Line::from(""),
        Line::from("How to use:"),
        Line::from("  1. Press n (or click 'New') to add a template"),
        Line::from("  2. Enter expands the code panel, c copies the code"),
        Line::from("  3. s cycles the learning status"),
    ]
}

struct HelpTopic {
    title: &'static str,
    detail: &'static str,
}

const HELP_TOPICS: &[HelpTopic] = &[
    HelpTopic {
        title: "Open Help",
        detail: "Press ? to pop this help open, type to filter, Esc to hide it.",
    },
    HelpTopic {
        title: "Switch Views",
        detail: "Keys 1/2/3 jump to Problems, Patterns, Templates; Tab cycles through them. The bar at the top is clickable too.",
    },
    HelpTopic {
        title: "Global Search",
        detail: "Hit Ctrl+F (or the Search button), type what you need, move with Up/Down, press Enter to jump there.",
    },
    HelpTopic {
        title: "Adding Problems",
        detail: "Press n on the Problems view. The Problem field accepts a raw identifier or a full URL; known judges (LeetCode, Codeforces, AtCoder) get a short code derived automatically.",
    },
    HelpTopic {
        title: "Pattern Filtering",
        detail: "Highlight a pattern and press Enter (or click Filter) to narrow the problems list to that pattern. Press Enter again, c, or the No Filter button to clear it.",
    },
    HelpTopic {
        title: "Editing & Saving",
        detail: "Ctrl+S saves a form, Esc cancels it. Closing a form always discards the buffer, so a cancelled entry never leaks into the next one.",
    },
    HelpTopic {
        title: "Deleting",
        detail: "d asks for confirmation first; y confirms, n or Esc backs out. Deletes are not undoable.",
    },
    HelpTopic {
        title: "Theme",
        detail: "t (or the Theme button) toggles light/dark. The choice is remembered across sessions.",
    },
    HelpTopic {
        title: "Where Data Lives",
        detail: "Collections are stored as JSON files under the cptrack folder in your user data directory, one file per collection. Copy that folder to back everything up. Two instances writing at once is last-write-wins.",
    },
    HelpTopic {
        title: "CSV Export",
        detail: "x on the Problems view writes problems.csv next to the JSON files.",
    },
];

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("data"));
        (storage, dir)
    }

    fn hydrated() -> (AppState, TempDir) {
        let (storage, dir) = temp_storage();
        let (state, warnings) = AppState::hydrate(storage);
        assert!(warnings.is_empty());
        (state, dir)
    }

    fn sample_problem(id: &str) -> Problem {
        let mut problem = Problem::new();
        problem.id = id.to_string();
        problem.difficulty = "1500".to_string();
        problem.status = ProblemStatus::Complete;
        problem.patterns = vec!["dp".to_string()];
        problem.analysis = "standard knapsack".to_string();
        problem
    }

    #[test]
    fn save_then_load_round_trips_problems() {
        let (mut state, _dir) = hydrated();
        state.add_problem(sample_problem("CF1427E")).unwrap();
        state.add_problem(sample_problem("two-sum")).unwrap();

        let reopened = Storage::new(state.storage.root().to_path_buf());
        let (restored, warnings) = AppState::hydrate(reopened);
        assert!(warnings.is_empty());
        assert_eq!(restored.problems.len(), 2);
        assert_eq!(restored.problems[0].id, "CF1427E");
        assert_eq!(restored.problems[0].uid, state.problems[0].uid);
        assert_eq!(restored.problems[0].status, ProblemStatus::Complete);
        assert_eq!(restored.problems[1].id, "two-sum");
    }

    #[test]
    fn missing_keys_hydrate_empty_without_warnings() {
        let (state, _dir) = hydrated();
        assert_eq!(state.theme, Theme::Light);
        assert!(state.problems.is_empty());
        assert!(state.patterns.is_empty());
        assert!(state.templates.is_empty());
    }

    #[test]
    fn corrupt_collection_hydrates_empty_with_warning() {
        let (storage, _dir) = temp_storage();
        fs::create_dir_all(storage.root()).unwrap();
        fs::write(storage.path_for(PROBLEMS_KEY), "{ not json").unwrap();
        let (state, warnings) = AppState::hydrate(storage);
        assert!(state.problems.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("problems"));
    }

    #[test]
    fn legacy_bare_string_patterns_are_lifted_and_rewritten() {
        let (storage, _dir) = temp_storage();
        fs::create_dir_all(storage.root()).unwrap();
        fs::write(storage.path_for(PATTERNS_KEY), r#"["dp","two-pointers"]"#).unwrap();
        let (state, warnings) = AppState::hydrate(storage);
        assert!(warnings.is_empty());
        assert_eq!(state.patterns.len(), 2);
        assert_eq!(state.patterns[0].name, "dp");
        assert_eq!(state.patterns[0].frequency, 0);
        assert_eq!(state.patterns[1].name, "two-pointers");

        // The upgrade pass rewrote the canonical record shape
        let raw = fs::read_to_string(state.storage.path_for(PATTERNS_KEY)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value[0].is_object());
        assert_eq!(value[0]["name"], "dp");
        assert_eq!(value[0]["frequency"], 0);
    }

    #[test]
    fn mixed_pattern_shapes_both_deserialize() {
        let (storage, _dir) = temp_storage();
        fs::create_dir_all(storage.root()).unwrap();
        fs::write(
            storage.path_for(PATTERNS_KEY),
            r#"["dp", {"name": "graphs", "frequency": 3}]"#,
        )
        .unwrap();
        let (state, warnings) = AppState::hydrate(storage);
        assert!(warnings.is_empty());
        assert_eq!(state.patterns[0].name, "dp");
        assert_eq!(state.patterns[0].frequency, 0);
        assert_eq!(state.patterns[1].name, "graphs");
        assert_eq!(state.patterns[1].frequency, 3);
    }

    #[test]
    fn adding_duplicate_pattern_is_a_noop() {
        let (mut state, _dir) = hydrated();
        assert!(state.add_pattern("dp").unwrap());
        assert!(!state.add_pattern("dp").unwrap());
        assert!(!state.add_pattern("  dp  ").unwrap());
        assert!(!state.add_pattern("").unwrap());
        assert_eq!(state.patterns.len(), 1);
    }

    #[test]
    fn deleting_preserves_relative_order() {
        let (mut state, _dir) = hydrated();
        for id in ["a", "b", "c"] {
            state.add_problem(sample_problem(id)).unwrap();
        }
        let middle = state.problems[1].uid;
        assert!(state.delete_problem(middle).unwrap());
        assert_eq!(state.problems.len(), 2);
        assert_eq!(state.problems[0].id, "a");
        assert_eq!(state.problems[1].id, "c");
        // Deleting an unknown uid touches nothing
        assert!(!state.delete_problem(Uuid::new_v4()).unwrap());
        assert_eq!(state.problems.len(), 2);
    }

    #[test]
    fn frequency_clamps_at_zero_and_increments_by_one() {
        let (mut state, _dir) = hydrated();
        state.add_pattern("dp").unwrap();
        let uid = state.patterns[0].uid;
        assert!(state.bump_pattern_frequency(uid, -1).unwrap());
        assert_eq!(state.patterns[0].frequency, 0);
        assert!(state.bump_pattern_frequency(uid, 1).unwrap());
        assert_eq!(state.patterns[0].frequency, 1);
        state.bump_pattern_frequency(uid, -1).unwrap();
        state.bump_pattern_frequency(uid, -1).unwrap();
        assert_eq!(state.patterns[0].frequency, 0);
    }

    #[test]
    fn template_status_and_frequency_updates() {
        let (mut state, _dir) = hydrated();
        let mut template = Template::new("sieve");
        template.code = "for i in 2..n {}".to_string();
        state.add_template(template).unwrap();
        let uid = state.templates[0].uid;
        assert_eq!(state.templates[0].status, TemplateStatus::ToDo);
        state
            .set_template_status(uid, TemplateStatus::Memorized)
            .unwrap();
        assert_eq!(state.templates[0].status, TemplateStatus::Memorized);
        state.bump_template_frequency(uid, -1).unwrap();
        assert_eq!(state.templates[0].frequency, 0);
        state.bump_template_frequency(uid, 1).unwrap();
        assert_eq!(state.templates[0].frequency, 1);
    }

    #[test]
    fn template_status_cycle_covers_all_states() {
        let mut status = TemplateStatus::ToDo;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(status);
            status = status.next();
        }
        assert_eq!(status, TemplateStatus::ToDo);
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn derive_identifier_vectors() {
        assert_eq!(
            derive_problem_id("https://leetcode.com/problems/two-sum/"),
            "two-sum"
        );
        assert_eq!(
            derive_problem_id("https://codeforces.com/problem/1427E"),
            "CF1427E"
        );
        assert_eq!(
            derive_problem_id("https://codeforces.com/contest/1427/problem/E"),
            "CF1427E"
        );
        assert_eq!(
            derive_problem_id("https://atcoder.jp/contests/abc123/tasks/abc123_a"),
            "ACabc123_a"
        );
        assert_eq!(derive_problem_id("not a url"), "not a url");
        assert_eq!(derive_problem_id("1427E"), "1427E");
        assert_eq!(
            derive_problem_id("www.leetcode.com/problems/merge-intervals"),
            "merge-intervals"
        );
        assert_eq!(derive_problem_id("https://example.com/a/b/c"), "c");
    }

    #[test]
    fn difficulty_classification_vectors() {
        assert_eq!(classify_difficulty("Easy"), DifficultyBand::Easy);
        assert_eq!(classify_difficulty("2500"), DifficultyBand::Hard);
        assert_eq!(classify_difficulty("1500"), DifficultyBand::Medium);
        assert_eq!(classify_difficulty("900"), DifficultyBand::Easy);
        assert_eq!(classify_difficulty("h"), DifficultyBand::Hard);
        assert_eq!(classify_difficulty("Very Hard"), DifficultyBand::Hard);
        assert_eq!(classify_difficulty("whatever"), DifficultyBand::Unknown);
        assert_eq!(classify_difficulty(""), DifficultyBand::Unknown);
    }

    #[test]
    fn status_classification_is_substring_based() {
        assert_eq!(classify_status("Complete"), ProblemStatus::Complete);
        assert_eq!(classify_status("in progress"), ProblemStatus::InProgress);
        assert_eq!(classify_status("something else"), ProblemStatus::ToDo);
        assert_eq!(classify_status(""), ProblemStatus::ToDo);
    }

    #[test]
    fn deleting_filtering_pattern_clears_selection() {
        let (mut state, _dir) = hydrated();
        state.add_pattern("dp").unwrap();
        let uid = state.patterns[0].uid;
        let mut app = App::new(state, Vec::new());
        app.filter_pattern = Some((uid, "dp".to_string()));
        app.pending_delete = Some(PendingDelete {
            target: DeleteTarget::Pattern(uid),
            label: "pattern 'dp'".to_string(),
        });
        perform_pending_delete(&mut app);
        assert!(app.filter_pattern.is_none());
        assert!(app.state.patterns.is_empty());
        assert!(app.pending_delete.is_none());
    }

    #[test]
    fn deleting_other_pattern_keeps_selection() {
        let (mut state, _dir) = hydrated();
        state.add_pattern("dp").unwrap();
        state.add_pattern("graphs").unwrap();
        let kept = state.patterns[0].uid;
        let removed = state.patterns[1].uid;
        let mut app = App::new(state, Vec::new());
        app.filter_pattern = Some((kept, "dp".to_string()));
        app.pending_delete = Some(PendingDelete {
            target: DeleteTarget::Pattern(removed),
            label: "pattern 'graphs'".to_string(),
        });
        perform_pending_delete(&mut app);
        assert_eq!(app.filter_pattern.as_ref().map(|(uid, _)| *uid), Some(kept));
    }

    #[test]
    fn pattern_filter_narrows_visible_problems() {
        let (mut state, _dir) = hydrated();
        state.add_pattern("dp").unwrap();
        let uid = state.patterns[0].uid;
        let mut tagged = sample_problem("CF1427E");
        tagged.patterns = vec!["dp".to_string()];
        let mut untagged = sample_problem("two-sum");
        untagged.patterns = vec!["greedy".to_string()];
        state.add_problem(tagged).unwrap();
        state.add_problem(untagged).unwrap();

        let mut app = App::new(state, Vec::new());
        assert_eq!(app.visible_problem_indices(), vec![0, 1]);
        app.filter_pattern = Some((uid, "dp".to_string()));
        assert_eq!(app.visible_problem_indices(), vec![0]);
    }

    #[test]
    fn problem_form_round_trips() {
        let mut problem = sample_problem("CF1427E");
        problem.link = Some("https://codeforces.com/problem/1427E".to_string());
        problem.metacognition = "slow start".to_string();
        problem.takeaways = "binary search the answer".to_string();
        let content = format_problem_editor_content(&problem);
        let parsed = parse_problem_editor_content(&content, Some(&problem)).unwrap();
        assert_eq!(parsed.uid, problem.uid);
        assert_eq!(parsed.id, "CF1427E");
        assert_eq!(
            parsed.link.as_deref(),
            Some("https://codeforces.com/problem/1427E")
        );
        assert_eq!(parsed.status, ProblemStatus::Complete);
        assert_eq!(parsed.patterns, vec!["dp".to_string()]);
        assert_eq!(parsed.metacognition, "slow start");
        assert_eq!(parsed.takeaways, "binary search the answer");
        assert_eq!(parsed.analysis, "standard knapsack");
    }

    #[test]
    fn problem_form_requires_identifier() {
        let err = parse_problem_editor_content("Problem: \nDifficulty: 1200", None).unwrap_err();
        assert!(err.contains("Problem is required"));
    }

    #[test]
    fn problem_form_status_hint_is_not_misread() {
        // The template's option hint mentions "In Progress"; it must not leak
        // into classification of the actual value.
        let input = "Problem: 1427E\nStatus: To Do (options: Complete|In Progress|To Do)";
        let parsed = parse_problem_editor_content(input, None).unwrap();
        assert_eq!(parsed.status, ProblemStatus::ToDo);
    }

    #[test]
    fn problem_form_derives_id_and_keeps_url_as_link() {
        let input = "Problem: https://leetcode.com/problems/two-sum/\nDifficulty: Easy\nStatus: To Do (options: Complete|In Progress|To Do)\nPatterns: hash-map, arrays\n\nAnalysis:\none pass with a map";
        let parsed = parse_problem_editor_content(input, None).unwrap();
        assert_eq!(parsed.id, "two-sum");
        assert_eq!(
            parsed.link.as_deref(),
            Some("https://leetcode.com/problems/two-sum/")
        );
        assert_eq!(parsed.status, ProblemStatus::ToDo);
        assert_eq!(
            parsed.patterns,
            vec!["hash-map".to_string(), "arrays".to_string()]
        );
        assert_eq!(parsed.analysis, "one pass with a map");
    }

    #[test]
    fn template_form_keeps_code_verbatim() {
        let input = "Title: Sieve\nStatus: revise (options: to-do|in-progress|revise|memorized)\n\nCode:\nfn sieve(n: usize) {\n    let mut is_prime = vec![true; n + 1];\n}";
        let parsed = parse_template_editor_content(input, None).unwrap();
        assert_eq!(parsed.title, "Sieve");
        assert_eq!(parsed.status, TemplateStatus::Revise);
        assert_eq!(
            parsed.code,
            "fn sieve(n: usize) {\n    let mut is_prime = vec![true; n + 1];\n}"
        );
    }

    #[test]
    fn template_form_rejects_unknown_status() {
        let input = "Title: Sieve\nStatus: learned\n\nCode:\n";
        let err = parse_template_editor_content(input, None).unwrap_err();
        assert!(err.contains("Valid options"));
    }

    #[test]
    fn template_form_round_trips() {
        let mut template = Template::new("DSU");
        template.status = TemplateStatus::InProgress;
        template.frequency = 4;
        template.code = "struct Dsu {\n    parent: Vec<usize>,\n}".to_string();
        let content = format_template_editor_content(&template);
        let parsed = parse_template_editor_content(&content, Some(&template)).unwrap();
        assert_eq!(parsed.uid, template.uid);
        assert_eq!(parsed.title, "DSU");
        assert_eq!(parsed.status, TemplateStatus::InProgress);
        assert_eq!(parsed.frequency, 4);
        assert_eq!(parsed.code, template.code);
    }

    #[test]
    fn pattern_editor_parses_name_line() {
        assert_eq!(
            parse_pattern_editor_content("Name: two pointers"),
            "two pointers"
        );
        assert_eq!(parse_pattern_editor_content("dp"), "dp");
        assert_eq!(parse_pattern_editor_content("Name: "), "");
    }

    #[test]
    fn status_enums_serialize_to_original_strings() {
        assert_eq!(
            serde_json::to_string(&TemplateStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&ProblemStatus::InProgress).unwrap(),
            "\"In Progress\""
        );
        assert_eq!(
            serde_json::to_string(&ProblemStatus::ToDo).unwrap(),
            "\"To Do\""
        );
        assert_eq!(serde_json::to_string(&Theme::Dark).unwrap(), "\"dark\"");
        let parsed: TemplateStatus = serde_json::from_str("\"memorized\"").unwrap();
        assert_eq!(parsed, TemplateStatus::Memorized);
    }

    #[test]
    fn theme_round_trips_through_storage() {
        let (mut state, _dir) = hydrated();
        assert_eq!(state.theme, Theme::Light);
        state.set_theme(Theme::Dark).unwrap();
        let reopened = Storage::new(state.storage.root().to_path_buf());
        let (restored, _) = AppState::hydrate(reopened);
        assert_eq!(restored.theme, Theme::Dark);
    }

    #[test]
    fn save_failure_reports_error_but_keeps_memory() {
        let (mut state, dir) = hydrated();
        state.add_pattern("dp").unwrap();
        // Make the storage root unusable by replacing it with a plain file
        fs::remove_dir_all(state.storage.root()).unwrap();
        fs::write(state.storage.root(), b"block").unwrap();
        let result = state.add_pattern("graphs");
        assert!(result.is_err());
        assert_eq!(state.patterns.len(), 2);
        drop(dir);
    }

    #[test]
    fn frequency_delta_saturates() {
        assert_eq!(apply_frequency_delta(0, -1), 0);
        assert_eq!(apply_frequency_delta(0, 1), 1);
        assert_eq!(apply_frequency_delta(5, -2), 3);
        assert_eq!(apply_frequency_delta(u32::MAX, 1), u32::MAX);
    }

    #[test]
    fn csv_export_writes_all_rows() {
        let (mut state, _dir) = hydrated();
        state.add_problem(sample_problem("CF1427E")).unwrap();
        let path = export_problems_csv(state.storage.root(), &state.problems).unwrap();
        let raw = fs::read_to_string(path).unwrap();
        let mut lines = raw.lines();
        assert!(lines.next().unwrap().starts_with("id,link,difficulty"));
        assert!(raw.contains("CF1427E"));
    }
}
