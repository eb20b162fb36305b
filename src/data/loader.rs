use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::iter::Enumerate;
use std::path::Path;
use std::str::Lines;

use chrono::NaiveDate;
use log::{debug, info, warn};

use super::missing::MissingValueNormalizer;
use super::model::{
    FileLayout, ParsedFile, Record, SeriesTable, Source, TreatmentId, ValueKind, Variable,
};
use super::temporal::{DateConflict, DateFields, TemporalResolver};
use crate::config::Config;
use crate::error::EvalError;

/// Column names that carry the treatment number.
const TREATMENT_COLUMNS: [&str; 4] = ["TRNO", "TRT", "TR", "TN"];
const DATE_COLUMN: &str = "DATE";
/// Date-axis columns repeat across blocks of one treatment and are exempt
/// from the duplicate-value rule.
pub(crate) const DATE_AXIS_COLUMNS: [&str; 4] = ["YEAR", "DOY", "DAS", "DAP"];

/// Common extensions that fit the crop-code pattern but are not DSSAT files.
const NON_CROP_EXTENSIONS: [&str; 3] = ["TXT", "DAT", "EXT"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// What kind of DSSAT file a path looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Simulated,
    Observed,
    Evaluate,
    Experiment,
}

impl FileKind {
    /// Dispatch by file name: `EVALUATE.OUT`, `*.OUT`, `*.??T`, `*.??X`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_ascii_uppercase();
        if file_name == "EVALUATE.OUT" {
            return Some(FileKind::Evaluate);
        }
        let ext = path.extension()?.to_str()?.to_ascii_uppercase();
        if ext == "OUT" {
            return Some(FileKind::Simulated);
        }
        // Two-letter crop code plus the file type letter, e.g. `SBT`, `MZX`.
        if ext.len() != 3
            || !ext.bytes().take(2).all(|b| b.is_ascii_alphabetic())
            || NON_CROP_EXTENSIONS.contains(&ext.as_str())
        {
            return None;
        }
        let (_, kind) = ext.split_at(2);
        match kind {
            "T" => Some(FileKind::Observed),
            "X" => Some(FileKind::Experiment),
            _ => None,
        }
    }
}

/// Read a text file, decoding as UTF-8 with a Latin-1 fallback.
pub fn read_text(path: &Path) -> Result<String, EvalError> {
    let bytes = std::fs::read(path).map_err(|source| EvalError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!("{} is not UTF-8, decoding as Latin-1", path.display());
            e.into_bytes().into_iter().map(char::from).collect()
        }
    })
}

/// Load one simulated or observed file into treatment-scoped tables.
///
/// `start` overrides `config.simulation_start` for `DAS` resolution.
pub fn load_file(
    path: &Path,
    source: Source,
    config: &Config,
    start: Option<NaiveDate>,
) -> Result<ParsedFile, EvalError> {
    let text = read_text(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let parsed = parse_series(&name, &text, source, config, start);
    info!(
        "Loaded {} ({}): {} treatment(s), {} error(s)",
        name,
        source,
        parsed.tables.len(),
        parsed.errors.len()
    );
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// RecordParser – header-driven state machine over raw text
// ---------------------------------------------------------------------------

/// One raw field of a data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    /// Verbatim token; empty when the fixed-width slot was blank.
    pub token: String,
}

/// A data row before sentinel normalization and date resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub line: usize,
    /// 0-based index of the header block this row belongs to.
    pub block: usize,
    pub treatment: TreatmentId,
    pub treatment_name: Option<String>,
    pub date_token: Option<String>,
    pub fields: Vec<RawField>,
    pub labels: BTreeMap<String, String>,
}

/// Header metadata, announced before the first row of its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub index: usize,
    pub line: usize,
    pub treatment: TreatmentId,
    pub treatment_name: Option<String>,
    pub columns: Vec<String>,
    /// Column → unit, from the optional unit row of observed files.
    pub units: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Block(BlockInfo),
    Row(RawRow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Treatment,
    Date,
    Label,
    Value,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    /// Right edge (exclusive, in chars) of the header token.
    end: usize,
    role: ColumnRole,
}

#[derive(Debug)]
struct Block {
    info: BlockInfo,
    columns: Vec<Column>,
    expect_units: bool,
    announced: bool,
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    InBlock(Block),
}

/// Tokenizes a DSSAT text file into blocks and rows.
///
/// The parser itself holds no cursor: every call to [`events`](Self::events)
/// or [`rows`](Self::rows) starts a fresh pass over the same text, so
/// re-parsing is deterministic.
#[derive(Debug, Clone)]
pub struct RecordParser<'a> {
    name: &'a str,
    text: &'a str,
    layout: FileLayout,
    text_columns: Vec<String>,
}

impl<'a> RecordParser<'a> {
    pub fn new(name: &'a str, text: &'a str, layout: FileLayout, config: &Config) -> Self {
        Self {
            name,
            text,
            layout,
            text_columns: config.text_columns.clone(),
        }
    }

    pub fn events(&self) -> Events<'_, 'a> {
        Events {
            parser: self,
            lines: self.text.lines().enumerate(),
            state: State::AwaitingHeader,
            pending_banner: None,
            blocks_seen: 0,
            queued: None,
        }
    }

    /// Data rows only.
    pub fn rows(&self) -> impl Iterator<Item = Result<RawRow, EvalError>> + '_ {
        self.events().filter_map(|event| match event {
            Ok(ParseEvent::Row(row)) => Some(Ok(row)),
            Ok(ParseEvent::Block(_)) => None,
            Err(e) => Some(Err(e)),
        })
    }

    fn malformed(&self, line: usize, treatment: Option<TreatmentId>, reason: String) -> EvalError {
        EvalError::MalformedFile {
            file: self.name.to_string(),
            line,
            treatment,
            reason,
        }
    }

    fn role_of(&self, name: &str, taken: &[Column]) -> ColumnRole {
        let has = |role| taken.iter().any(|c| c.role == role);
        if TREATMENT_COLUMNS.iter().any(|t| t.eq_ignore_ascii_case(name)) && !has(ColumnRole::Treatment) {
            ColumnRole::Treatment
        } else if name.eq_ignore_ascii_case(DATE_COLUMN) && !has(ColumnRole::Date) {
            ColumnRole::Date
        } else if self.text_columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            ColumnRole::Label
        } else {
            ColumnRole::Value
        }
    }

    fn parse_header(&self, line: &str, lineno: usize) -> Result<Vec<Column>, EvalError> {
        let mut columns: Vec<Column> = Vec::new();
        for token in tokenize(line) {
            let name = token.text.trim_start_matches(['@', '*']);
            if name.is_empty() {
                continue;
            }
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(self.malformed(lineno, None, format!("duplicate column '{name}' in header")));
            }
            let role = self.role_of(name, &columns);
            columns.push(Column {
                name: name.to_string(),
                end: token.end,
                role,
            });
        }
        if columns.is_empty() {
            return Err(self.malformed(lineno, None, "header line has no column names".into()));
        }
        Ok(columns)
    }

    /// Map the tokens of a data line onto the block's columns.
    fn split_row(&self, block: &Block, line: &str, lineno: usize) -> Result<RawRow, EvalError> {
        let tokens = tokenize(line);
        let n = block.columns.len();
        let mut slots: Vec<Option<&str>> = vec![None; n];
        let mut extras: Vec<(String, &str)> = Vec::new();

        if tokens.len() >= n {
            for (slot, tok) in slots.iter_mut().zip(&tokens) {
                *slot = Some(tok.text);
            }
            if tokens.len() > n {
                debug!(
                    "{}:{lineno}: {} value(s) beyond the {n} header columns kept as opaque columns",
                    self.name,
                    tokens.len() - n
                );
            }
            for (k, tok) in tokens.iter().enumerate().skip(n) {
                extras.push((format!("COL{}", k + 1), tok.text));
            }
        } else {
            slots = align(&tokens, &block.columns).map_err(|text| {
                self.malformed(
                    lineno,
                    None,
                    format!("value '{text}' does not line up with any header column"),
                )
            })?;
        }

        let mut treatment = None;
        let mut date_token = None;
        let mut labels = BTreeMap::new();
        let mut fields = Vec::with_capacity(n + extras.len());
        for (column, slot) in block.columns.iter().zip(slots) {
            let token = slot.unwrap_or("");
            match column.role {
                ColumnRole::Treatment => treatment = TreatmentId::parse(token),
                ColumnRole::Date => date_token = Some(token.to_string()).filter(|t| !t.is_empty()),
                ColumnRole::Label => {
                    labels.insert(column.name.clone(), token.to_string());
                }
                ColumnRole::Value => fields.push(RawField {
                    name: column.name.clone(),
                    token: token.to_string(),
                }),
            }
        }
        fields.extend(extras.into_iter().map(|(name, token)| RawField {
            name,
            token: token.to_string(),
        }));

        let (treatment, treatment_name) = match treatment {
            Some(t) if t == block.info.treatment => (t, block.info.treatment_name.clone()),
            Some(t) => (t, None),
            None => (block.info.treatment.clone(), block.info.treatment_name.clone()),
        };

        Ok(RawRow {
            line: lineno,
            block: block.info.index,
            treatment,
            treatment_name,
            date_token,
            fields,
            labels,
        })
    }
}

/// Streaming iterator of [`ParseEvent`]s.
pub struct Events<'p, 'a> {
    parser: &'p RecordParser<'a>,
    lines: Enumerate<Lines<'a>>,
    state: State,
    pending_banner: Option<(TreatmentId, Option<String>)>,
    blocks_seen: usize,
    queued: Option<RawRow>,
}

impl Events<'_, '_> {
    /// Index of the block the last event came from, if inside one.
    pub fn current_block(&self) -> Option<usize> {
        match &self.state {
            State::InBlock(block) => Some(block.info.index),
            State::AwaitingHeader => None,
        }
    }

    fn open_block(&mut self, line: &str, lineno: usize) -> Result<(), EvalError> {
        let index = self.blocks_seen;
        self.blocks_seen += 1;
        self.state = State::AwaitingHeader;

        let banner = self.pending_banner.take();
        let columns = self.parser.parse_header(line, lineno)?;
        let (treatment, treatment_name) = match banner {
            Some((id, name)) => (id, name),
            None => match self.parser.layout {
                FileLayout::Observed => (TreatmentId::Number(1), None),
                FileLayout::Simulated | FileLayout::Evaluate => {
                    (TreatmentId::Number(self.blocks_seen as u32), None)
                }
            },
        };
        debug!(
            "{}:{lineno}: block {index} for treatment {treatment} with {} columns",
            self.parser.name,
            columns.len()
        );
        self.state = State::InBlock(Block {
            info: BlockInfo {
                index,
                line: lineno,
                treatment,
                treatment_name,
                columns: columns.iter().map(|c| c.name.clone()).collect(),
                units: BTreeMap::new(),
            },
            columns,
            expect_units: self.parser.layout == FileLayout::Observed,
            announced: false,
        });
        Ok(())
    }
}

impl Iterator for Events<'_, '_> {
    type Item = Result<ParseEvent, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.queued.take() {
            return Some(Ok(ParseEvent::Row(row)));
        }
        loop {
            let (idx, line) = self.lines.next()?;
            let lineno = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('@') || is_star_header(trimmed) {
                match self.open_block(line, lineno) {
                    Ok(()) => continue,
                    Err(e) => return Some(Err(e)),
                }
            }
            if let Some(banner) = parse_banner(trimmed) {
                self.pending_banner = Some(banner);
                self.state = State::AwaitingHeader;
                continue;
            }
            if trimmed.starts_with('*') {
                self.pending_banner = None;
                self.state = State::AwaitingHeader;
                continue;
            }
            if trimmed.starts_with('!') || trimmed.starts_with('$') {
                continue;
            }

            let parser = self.parser;
            let State::InBlock(block) = &mut self.state else {
                // Run banners, model descriptions and other preamble.
                continue;
            };
            if block.expect_units {
                block.expect_units = false;
                if is_unit_row(trimmed) {
                    let tokens = tokenize(line);
                    let slots: Result<Vec<Option<&str>>, &str> = if tokens.len() == block.columns.len() {
                        Ok(tokens.iter().map(|t| Some(t.text)).collect())
                    } else {
                        align(&tokens, &block.columns)
                    };
                    match slots {
                        Ok(slots) => {
                            block.info.units = block
                                .columns
                                .iter()
                                .zip(slots)
                                .filter_map(|(c, unit)| Some((c.name.clone(), unit?.to_string())))
                                .collect();
                        }
                        Err(_) => debug!("{}:{lineno}: unit row does not line up, ignored", parser.name),
                    }
                    continue;
                }
            }
            let row = match parser.split_row(block, line, lineno) {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            if !block.announced {
                block.announced = true;
                self.queued = Some(row);
                return Some(Ok(ParseEvent::Block(block.info.clone())));
            }
            return Some(Ok(ParseEvent::Row(row)));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    /// Char offset one past the last char.
    end: usize,
    text: &'a str,
}

fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = 0;
    for (char_pos, (byte_pos, ch)) in line.char_indices().enumerate() {
        chars = char_pos + 1;
        if ch.is_whitespace() {
            if let Some(begin) = start.take() {
                tokens.push(Token {
                    end: char_pos,
                    text: &line[begin..byte_pos],
                });
            }
        } else if start.is_none() {
            start = Some(byte_pos);
        }
    }
    if let Some(begin) = start {
        tokens.push(Token {
            end: chars,
            text: &line[begin..],
        });
    }
    tokens
}

/// Place fewer tokens than columns: each token goes to the first remaining
/// column whose right edge it does not pass (fixed-width, right-aligned).
/// On failure returns the token that could not be placed.
fn align<'t>(tokens: &[Token<'t>], columns: &[Column]) -> Result<Vec<Option<&'t str>>, &'t str> {
    let mut slots = vec![None; columns.len()];
    let mut next_col = 0;
    for tok in tokens {
        let col = (next_col..columns.len())
            .find(|&j| tok.end <= columns[j].end)
            .ok_or(tok.text)?;
        slots[col] = Some(tok.text);
        next_col = col + 1;
    }
    Ok(slots)
}

/// `TREATMENT  1   : IRRIGATED` → `(1, Some("IRRIGATED"))`.
fn parse_banner(trimmed: &str) -> Option<(TreatmentId, Option<String>)> {
    let head = trimmed.get(..9)?;
    if !head.eq_ignore_ascii_case("TREATMENT") {
        return None;
    }
    let rest = &trimmed[9..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (id_part, name_part) = match rest.split_once(':') {
        Some((id, name)) => (id, Some(name.trim())),
        None => (rest, None),
    };
    let mut ids = id_part.split_whitespace();
    let token = ids.next()?;
    if ids.next().is_some() {
        return None;
    }
    // Without a `:` only a numeric id marks a banner.
    let id = match name_part {
        Some(_) => TreatmentId::parse(token)?,
        None => TreatmentId::Number(token.parse().ok()?),
    };
    let name = name_part.filter(|n| !n.is_empty()).map(str::to_string);
    Some((id, name))
}

/// Some outputs (FORAGE.OUT) open a block with `*YEAR ...` instead of `@YEAR`.
fn is_star_header(trimmed: &str) -> bool {
    trimmed.strip_prefix('*').is_some_and(|rest| {
        rest.split_whitespace()
            .any(|tok| tok.eq_ignore_ascii_case("YEAR"))
    })
}

fn is_unit_row(trimmed: &str) -> bool {
    trimmed
        .split_whitespace()
        .all(|tok| tok.parse::<f64>().is_err())
}

// ---------------------------------------------------------------------------
// Assembly – raw rows → normalized, dated, treatment-scoped tables
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScopeRows {
    treatment_name: Option<String>,
    records: Vec<Record>,
    conflicts: Vec<DateConflict>,
    columns: Vec<String>,
    continuous: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct TableAcc {
    treatment_name: Option<String>,
    records: Vec<Record>,
    conflicts: Vec<DateConflict>,
    columns: Vec<String>,
    continuous: BTreeSet<String>,
    units: BTreeMap<String, String>,
    seen: HashMap<(String, NaiveDate), usize>,
}

/// Parse text into treatment-scoped [`SeriesTable`]s.
///
/// A failure aborts only its block/treatment scope: the error is recorded in
/// [`ParsedFile::errors`] and every other scope is still returned.
pub fn parse_series(
    name: &str,
    text: &str,
    source: Source,
    config: &Config,
    start: Option<NaiveDate>,
) -> ParsedFile {
    let layout = match source {
        Source::Simulated => FileLayout::Simulated,
        Source::Observed => FileLayout::Observed,
    };
    let parser = RecordParser::new(name, text, layout, config);
    let normalizer = MissingValueNormalizer::from_config(config);
    let resolver = TemporalResolver::from_config(config, start);

    let mut blocks: BTreeMap<usize, BlockInfo> = BTreeMap::new();
    let mut scopes: BTreeMap<(usize, TreatmentId), ScopeRows> = BTreeMap::new();
    let mut poisoned: BTreeSet<(usize, Option<TreatmentId>)> = BTreeSet::new();
    let mut errors = Vec::new();

    let mut events = parser.events();
    while let Some(event) = events.next() {
        match event {
            Ok(ParseEvent::Block(info)) => {
                blocks.insert(info.index, info);
            }
            Ok(ParseEvent::Row(row)) => {
                if poisoned.contains(&(row.block, None))
                    || poisoned.contains(&(row.block, Some(row.treatment.clone())))
                {
                    continue;
                }
                match build_record(name, &row, &normalizer, &resolver) {
                    Ok((record, conflicts)) => {
                        let scope = scopes.entry((row.block, row.treatment.clone())).or_default();
                        if scope.treatment_name.is_none() {
                            scope.treatment_name = row.treatment_name.clone();
                        }
                        for field in &row.fields {
                            if !scope.columns.contains(&field.name) {
                                scope.columns.push(field.name.clone());
                            }
                            if field.token.contains(['.', 'e', 'E']) {
                                scope.continuous.insert(field.name.clone());
                            }
                        }
                        scope.conflicts.extend(conflicts);
                        scope.records.push(record);
                    }
                    Err(e) => {
                        warn!("{e}; dropping block {} for treatment {}", row.block, row.treatment);
                        poisoned.insert((row.block, Some(row.treatment.clone())));
                        errors.push(e);
                    }
                }
            }
            Err(e) => {
                if let Some(block) = events.current_block() {
                    warn!("{e}; dropping block {block}");
                    poisoned.insert((block, e.treatment().cloned()));
                } else {
                    warn!("{e}");
                }
                errors.push(e);
            }
        }
    }

    let mut tables: BTreeMap<TreatmentId, TableAcc> = BTreeMap::new();
    for ((block, treatment), scope) in scopes {
        if poisoned.contains(&(block, None)) || poisoned.contains(&(block, Some(treatment.clone()))) {
            continue;
        }
        let acc = tables.entry(treatment.clone()).or_default();
        if source == Source::Simulated {
            if let Err(e) = check_duplicates(name, &treatment, &scope.records, &acc.seen) {
                warn!("{e}; dropping block {block} for treatment {treatment}");
                errors.push(e);
                continue;
            }
        }
        for record in &scope.records {
            for (var, value) in &record.values {
                if !value.is_absent() {
                    acc.seen.insert((var.to_ascii_uppercase(), record.date), record.line);
                }
            }
        }
        if acc.treatment_name.is_none() {
            acc.treatment_name = scope.treatment_name;
        }
        for column in scope.columns {
            if !acc.columns.contains(&column) {
                acc.columns.push(column);
            }
        }
        acc.continuous.extend(scope.continuous);
        if let Some(info) = blocks.get(&block) {
            for (col, unit) in &info.units {
                acc.units.entry(col.clone()).or_insert_with(|| unit.clone());
            }
        }
        acc.conflicts.extend(scope.conflicts);
        acc.records.extend(scope.records);
    }

    let tables = tables
        .into_iter()
        .filter(|(_, acc)| !acc.records.is_empty())
        .map(|(treatment, acc)| {
            if !acc.conflicts.is_empty() {
                warn!(
                    "{name}: treatment {treatment} has {} record(s) whose date sources disagree",
                    acc.conflicts.len()
                );
            }
            let variables = acc
                .columns
                .iter()
                .map(|col| Variable {
                    name: col.clone(),
                    unit: acc.units.get(col).cloned(),
                    kind: if acc.continuous.contains(col) {
                        ValueKind::Continuous
                    } else {
                        ValueKind::IntegerCoded
                    },
                })
                .collect();
            let table = SeriesTable::new(
                source,
                treatment.clone(),
                acc.treatment_name,
                variables,
                acc.records,
                acc.conflicts,
            );
            (treatment, table)
        })
        .collect();

    ParsedFile {
        name: name.to_string(),
        source,
        tables,
        errors,
    }
}

fn build_record(
    file: &str,
    row: &RawRow,
    normalizer: &MissingValueNormalizer,
    resolver: &TemporalResolver,
) -> Result<(Record, Vec<DateConflict>), EvalError> {
    let values = normalizer.normalize_row(file, row)?;
    let fields = DateFields::from_values(row.date_token.as_deref(), &values);
    let resolution = resolver
        .resolve(row.line, &fields)
        .ok_or_else(|| EvalError::UnresolvedDate {
            file: file.to_string(),
            line: row.line,
            treatment: row.treatment.clone(),
        })?;
    let record = Record {
        line: row.line,
        treatment: row.treatment.clone(),
        date: resolution.date,
        days_after_start: resolution.days_after_start,
        date_source: resolution.source,
        values,
        labels: row.labels.clone(),
    };
    Ok((record, resolution.conflicts))
}

/// Simulated data: a treatment/variable/date triple holds at most one value.
fn check_duplicates(
    file: &str,
    treatment: &TreatmentId,
    records: &[Record],
    seen: &HashMap<(String, NaiveDate), usize>,
) -> Result<(), EvalError> {
    let mut local: HashMap<(String, NaiveDate), usize> = HashMap::new();
    for record in records {
        for (var, value) in &record.values {
            if value.is_absent() || DATE_AXIS_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(var)) {
                continue;
            }
            let key = (var.to_ascii_uppercase(), record.date);
            if let Some(first) = seen.get(&key).or_else(|| local.get(&key)) {
                return Err(EvalError::MalformedFile {
                    file: file.to_string(),
                    line: record.line,
                    treatment: Some(treatment.clone()),
                    reason: format!(
                        "second value for {var} on {} (first on line {first})",
                        record.date
                    ),
                });
            }
            local.insert(key, record.line);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Value;

    const PLANTGRO: &str = "\
*DSSAT Cropping System Model Ver. 4.8.0.000

*RUN   1        : IRRIGATED
 MODEL          : CRGRO048 - Soybean
 EXPERIMENT     : UFGA7801 SB RAINFED AND IRRIGATED
 TREATMENT  1   : IRRIGATED

@YEAR DOY   DAS   DAP  LAID  CWAD
 1978 166     0     0  0.00     0
 1978 173     7     7  0.12    35
 1978 180    14    14  0.50   -99

*RUN   2        : RAINFED
 MODEL          : CRGRO048 - Soybean
 TREATMENT  2   : RAINFED

@YEAR DOY   DAS   DAP  LAID  CWAD
 1978 166     0     0  0.00     0
 1978 173     7     7  0.10    30
";

    fn parse(text: &str, source: Source) -> ParsedFile {
        parse_series("TEST.OUT", text, source, &Config::default(), None)
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn repeated_headers_open_new_treatment_scopes() {
        let parsed = parse(PLANTGRO, Source::Simulated);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.tables.len(), 2);

        let t1 = parsed.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t1.treatment_name.as_deref(), Some("IRRIGATED"));
        assert_eq!(t1.len(), 3);
        assert_eq!(t1.records[1].date, ymd(1978, 6, 22));
        assert_eq!(t1.records[2].value("CWAD"), Value::Absent);
        assert_eq!(t1.records[2].value("LAID"), Value::Number(0.5));

        let t2 = parsed.table(&TreatmentId::Number(2)).unwrap();
        assert_eq!(t2.len(), 2);
        assert_eq!(t2.series("LAID"), vec![(ymd(1978, 6, 15), 0.0), (ymd(1978, 6, 22), 0.1)]);
    }

    #[test]
    fn blocks_without_banners_get_ordinal_treatments() {
        let text = "\
@YEAR DOY  LAID
 2001  10   1.0
@YEAR DOY  LAID
 2001  10   2.0
";
        let parsed = parse(text, Source::Simulated);
        assert!(parsed.errors.is_empty());
        let ids: Vec<_> = parsed.treatments().cloned().collect();
        assert_eq!(ids, vec![TreatmentId::Number(1), TreatmentId::Number(2)]);
    }

    #[test]
    fn reparsing_is_deterministic() {
        let a = parse(PLANTGRO, Source::Simulated);
        let b = parse(PLANTGRO, Source::Simulated);
        assert_eq!(a.tables, b.tables);

        let parser = RecordParser::new("TEST.OUT", PLANTGRO, FileLayout::Simulated, &Config::default());
        let first: Vec<_> = parser.rows().map(|r| r.unwrap()).collect();
        let second: Vec<_> = parser.rows().map(|r| r.unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn variable_kinds_are_inferred_from_tokens() {
        let parsed = parse(PLANTGRO, Source::Simulated);
        let t1 = parsed.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t1.variable("laid").unwrap().kind, ValueKind::Continuous);
        assert_eq!(t1.variable("CWAD").unwrap().kind, ValueKind::IntegerCoded);
    }

    #[test]
    fn observed_file_with_unit_row_and_treatment_column() {
        let text = "\
*EXP. DATA (T): UFGA7801SB SOYBEAN

@TRNO   DATE  LAID  CWAD
!          d  m2m2 kg/ha
    1  78173  0.15    40
    2  78173  0.11   -99
    1  78180  0.55    90
";
        let parsed = parse(text, Source::Observed);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        // `!` rows are comments; the unit row needs no prefix.
        let text_units = text.replace("!          d", "           d");
        let with_units = parse(&text_units, Source::Observed);

        for parsed in [&parsed, &with_units] {
            let t1 = parsed.table(&TreatmentId::Number(1)).unwrap();
            assert_eq!(t1.len(), 2);
            assert_eq!(t1.records[0].date, ymd(1978, 6, 22));
            let t2 = parsed.table(&TreatmentId::Number(2)).unwrap();
            assert_eq!(t2.records[0].value("CWAD"), Value::Absent);
        }
        let t1 = with_units.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t1.variable("CWAD").unwrap().unit.as_deref(), Some("kg/ha"));
    }

    #[test]
    fn extra_trailing_columns_are_preserved() {
        let text = "\
@YEAR DOY  LAID
 2001  10   1.0   7.5
";
        let parsed = parse(text, Source::Simulated);
        let t = parsed.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t.records[0].value("COL4"), Value::Number(7.5));
        assert!(t.variable("COL4").is_some());
    }

    #[test]
    fn short_rows_align_on_right_edges() {
        let text = "\
@YEAR DOY  LAID  CWAD
 2001  10         120
";
        let parsed = parse(text, Source::Simulated);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let r = &parsed.table(&TreatmentId::Number(1)).unwrap().records[0];
        assert_eq!(r.value("LAID"), Value::Absent);
        assert_eq!(r.value("CWAD"), Value::Number(120.0));
    }

    #[test]
    fn bad_token_aborts_only_its_block() {
        let text = PLANTGRO.replace(" 1978 173     7     7  0.10    30", " 1978 173     7     7  oops    30");
        let parsed = parse(&text, Source::Simulated);
        assert_eq!(parsed.errors.len(), 1);
        match &parsed.errors[0] {
            EvalError::MalformedFile { line, treatment, .. } => {
                assert_eq!(*line, 19);
                assert_eq!(treatment, &Some(TreatmentId::Number(2)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(parsed.table(&TreatmentId::Number(1)).is_some());
        assert!(parsed.table(&TreatmentId::Number(2)).is_none());
    }

    #[test]
    fn missing_dates_are_unresolved() {
        let text = "\
@TRNO   DATE  LAID
    1  78173  0.15
    1    -99  0.20
";
        let parsed = parse(text, Source::Observed);
        assert!(matches!(
            parsed.errors.as_slice(),
            [EvalError::UnresolvedDate { line: 3, .. }]
        ));
        assert!(parsed.tables.is_empty());
    }

    #[test]
    fn duplicate_simulated_values_are_rejected() {
        let text = "\
TREATMENT 1 : A
@YEAR DOY  LAID
 2001  10   1.0
TREATMENT 1 : A
@YEAR DOY  LAID
 2001  10   1.5
";
        let parsed = parse(text, Source::Simulated);
        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(parsed.errors[0], EvalError::MalformedFile { line: 6, .. }));
        let t = parsed.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t.series("LAID"), vec![(ymd(2001, 1, 10), 1.0)]);
    }

    #[test]
    fn duplicate_observed_values_are_kept() {
        let text = "\
@TRNO   DATE  LAID
    1  01010   1.0
    1  01010   1.4
";
        let parsed = parse(text, Source::Observed);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.table(&TreatmentId::Number(1)).unwrap().len(), 2);
    }

    #[test]
    fn duplicate_header_names_are_malformed() {
        let text = "@YEAR DOY LAID LAID\n 2001 10 1 2\n";
        let parsed = parse(text, Source::Simulated);
        assert!(matches!(parsed.errors[0], EvalError::MalformedFile { line: 1, .. }));
        assert!(parsed.tables.is_empty());
    }

    #[test]
    fn labels_and_banners() {
        assert_eq!(
            parse_banner("TREATMENT  3   : LATE PLANTING"),
            Some((TreatmentId::Number(3), Some("LATE PLANTING".into())))
        );
        assert_eq!(parse_banner("TREATMENTS"), None);
        assert_eq!(parse_banner("TREATMENT:1"), None);
        assert_eq!(parse_banner("TREATMENT LEVELS ARE LISTED BELOW"), None);
        assert_eq!(parse_banner("TREATMENT 4"), Some((TreatmentId::Number(4), None)));
        let text = "@YEAR DOY CR LAID\n 2001 10 SB 1.0\n";
        let parsed = parse(text, Source::Simulated);
        let r = &parsed.table(&TreatmentId::Number(1)).unwrap().records[0];
        assert_eq!(r.labels.get("CR").map(String::as_str), Some("SB"));
        assert!(!r.values.contains_key("CR"));
    }

    #[test]
    fn file_kinds_from_names() {
        assert_eq!(FileKind::from_path(Path::new("PlantGro.OUT")), Some(FileKind::Simulated));
        assert_eq!(FileKind::from_path(Path::new("Evaluate.OUT")), Some(FileKind::Evaluate));
        assert_eq!(FileKind::from_path(Path::new("UFGA7801.SBT")), Some(FileKind::Observed));
        assert_eq!(FileKind::from_path(Path::new("UFGA7801.SBX")), Some(FileKind::Experiment));
        assert_eq!(FileKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(FileKind::from_path(Path::new("weather.dat")), None);
        assert_eq!(FileKind::from_path(Path::new("UFGA7801.S1T")), None);
        assert_eq!(FileKind::from_path(Path::new("UFGA7801.MZT")), Some(FileKind::Observed));
    }

    #[test]
    fn treatments_plural_does_not_rename_next_block() {
        let text = "\
*TREATMENTS
TREATMENTS
@YEAR DOY LAID
 2001  10  1.0
";
        let parsed = parse(text, Source::Simulated);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.treatments().cloned().collect::<Vec<_>>(), vec![TreatmentId::Number(1)]);
    }

    #[test]
    fn star_year_line_opens_a_block() {
        let text = "\
*DSSAT Cropping System Model Ver. 4.8.0.000

*YEAR DOY   DAS  FHWAH
 2001 100     0   10.0
 2001 101     1   11.0
";
        let parsed = parse(text, Source::Simulated);
        assert!(parsed.errors.is_empty());
        let t = parsed.table(&TreatmentId::Number(1)).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.series("FHWAH"), vec![(ymd(2001, 4, 10), 10.0), (ymd(2001, 4, 11), 11.0)]);
    }

    #[test]
    fn banner_of_a_rejected_header_is_dropped() {
        let text = "\
 TREATMENT  5   : LOST
@YEAR DOY LAID LAID
 2001  10    1    2
@YEAR DOY LAID
 2001  11  1.0
";
        let parsed = parse(text, Source::Simulated);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.treatments().cloned().collect::<Vec<_>>(), vec![TreatmentId::Number(2)]);
    }

    #[test]
    fn latin1_files_are_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LATIN.OUT");
        let mut bytes = b"* Ensayo de ca\xf1a\n".to_vec();
        bytes.extend_from_slice(b"@YEAR DOY LAID\n 2001 10 1.0\n");
        std::fs::write(&path, bytes).unwrap();
        let parsed = load_file(&path, Source::Simulated, &Config::default(), None).unwrap();
        assert_eq!(parsed.name, "LATIN.OUT");
        assert_eq!(parsed.tables.len(), 1);
    }
}
