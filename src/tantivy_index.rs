//! An in-process search service backed by Tantivy.
//!
//! [`EmbeddedService`] answers the same wire contract as a remote search
//! cluster: it reads the create-index body to build its schema and
//! analyzers, keeps per-document versions, and renders every answer
//! (including failures) as the JSON a cluster would send. Only the subset of
//! the query language the catalog needs is understood: `multi_match` and
//! `match_all`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::Instant,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    directory::MmapDirectory,
    query::{
        AllQuery,
        BooleanQuery,
        BoostQuery,
        DisjunctionMaxQuery,
        EmptyQuery,
        Query,
        TermQuery,
    },
    schema::{
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value as _,
    },
    tokenizer::{
        LowerCaser,
        NgramTokenizer,
        RawTokenizer,
        RemoveLongFilter,
        SimpleTokenizer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{
    error::{Error, Result},
    schema::{Analysis, AnalyzerDef, ComponentDef, IndexDefinition},
    service::{Refresh, SearchService, WireResponse},
};

/// Stored bookkeeping fields.
pub mod fields {
    pub const ID: &str = "_id";
    pub const VERSION: &str = "_version";
    pub const SOURCE: &str = "_source";
}

const STANDARD: &str = "standard";
const KEYWORD: &str = "keyword";
const DEFINITION_FILE: &str = "index-definition.json";
const ENGINE_DIR: &str = "engine";
const WRITER_MEMORY: usize = 50_000_000;
const DEFAULT_SIZE: usize = 10;
const TOTAL_HITS_LIMIT: usize = 10_000;

/// A refused request, rendered as a service error body.
#[derive(Debug)]
struct Rejection {
    status: u16,
    kind: &'static str,
    reason: String,
}

impl Rejection {
    fn new(status: u16, kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            reason: reason.into(),
        }
    }

    fn bad_request(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::new(400, kind, reason)
    }

    fn index_not_found(index: &str) -> Self {
        Self::new(
            404,
            "index_not_found_exception",
            format!("no such index [{index}]"),
        )
    }

    fn into_response(self) -> WireResponse {
        WireResponse::json(
            self.status,
            &json!({
                "error": {
                    "root_cause": [{"type": self.kind, "reason": self.reason}],
                    "type": self.kind,
                    "reason": self.reason,
                },
                "status": self.status,
            }),
        )
    }
}

impl From<tantivy::TantivyError> for Rejection {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::new(500, "engine_exception", err.to_string())
    }
}

impl From<std::io::Error> for Rejection {
    fn from(err: std::io::Error) -> Self {
        Self::new(500, "io_exception", err.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for Rejection {
    fn from(err: tantivy::directory::error::OpenDirectoryError) -> Self {
        Self::new(500, "io_exception", err.to_string())
    }
}

type Answer = std::result::Result<WireResponse, Rejection>;

fn lock<T>(mutex: &Mutex<T>) -> std::result::Result<MutexGuard<'_, T>, Rejection> {
    mutex
        .lock()
        .map_err(|_| Rejection::new(500, "engine_exception", "lock poisoned"))
}

/// The embedded search service. Holds any number of named indices, either in
/// RAM or on disk under one root directory.
///
/// Commits and reader reloads block, so every call runs on tokio's blocking
/// pool.
#[derive(Clone)]
pub struct EmbeddedService {
    registry: Arc<Registry>,
}

struct Registry {
    root: Option<PathBuf>,
    indices: RwLock<HashMap<String, Arc<EmbeddedIndex>>>,
}

impl EmbeddedService {
    /// A service whose indices live in RAM only (for testing).
    pub fn in_memory() -> Self {
        Self::with_root(None)
    }

    /// A service persisting each index under `root/<index>`.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self::with_root(Some(root.to_path_buf())))
    }

    /// Open the service under the catalog's data directory.
    ///
    /// The data directory is `data_dir` when given, then `$CHAINDB_DATA_DIR`,
    /// then `$XDG_DATA_HOME/chaindb`. Indices go in its `engine/` child.
    pub fn open_in_data_dir(data_dir: Option<&Path>) -> Result<Self> {
        let root = engine_root(data_dir)?;
        tracing::debug!(root = %root.display(), "opening embedded engine");
        Self::open(&root)
    }

    fn with_root(root: Option<PathBuf>) -> Self {
        Self {
            registry: Arc::new(Registry {
                root,
                indices: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Run `op` against the registry off the async workers.
    async fn run<F>(&self, op: F) -> WireResponse
    where
        F: FnOnce(&Registry) -> Answer + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || op(&registry))
            .await
            .unwrap_or_else(|e| {
                Err(Rejection::new(
                    500,
                    "engine_exception",
                    format!("engine task failed: {e}"),
                ))
            })
            .unwrap_or_else(Rejection::into_response)
    }
}

/// Resolve and create `<data dir>/engine`.
fn engine_root(data_dir: Option<&Path>) -> Result<PathBuf> {
    let data_dir = match data_dir {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os("CHAINDB_DATA_DIR") {
            Some(val) => PathBuf::from(val),
            None => xdg::BaseDirectories::with_prefix("chaindb")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config("could not determine XDG data home".into())
                })?,
        },
    };
    let root = data_dir.join(ENGINE_DIR);
    std::fs::create_dir_all(&root).map_err(|_| Error::DataDir(root.clone()))?;
    Ok(root)
}

impl Registry {
    fn index_dir(&self, name: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(name))
    }

    /// Look up an index, reopening it from disk on first use.
    fn get(&self, name: &str) -> std::result::Result<Arc<EmbeddedIndex>, Rejection> {
        if let Some(index) = self
            .indices
            .read()
            .map_err(|_| Rejection::new(500, "engine_exception", "lock poisoned"))?
            .get(name)
        {
            return Ok(index.clone());
        }

        let mut indices = self
            .indices
            .write()
            .map_err(|_| Rejection::new(500, "engine_exception", "lock poisoned"))?;
        if let Some(index) = indices.get(name) {
            return Ok(index.clone());
        }

        let Some(dir) = self.index_dir(name) else {
            return Err(Rejection::index_not_found(name));
        };
        let definition_path = dir.join(DEFINITION_FILE);
        if validate_index_name(name).is_err() || !definition_path.is_file() {
            return Err(Rejection::index_not_found(name));
        }

        let raw = std::fs::read(&definition_path)?;
        let definition: IndexDefinition = serde_json::from_slice(&raw)
            .map_err(|e| {
                Rejection::new(500, "engine_exception", format!("corrupt index definition: {e}"))
            })?;
        let index = Arc::new(EmbeddedIndex::build(name, &definition, Some(&dir))?);
        tracing::debug!(index = name, "reopened embedded index");
        indices.insert(name.to_string(), index.clone());
        Ok(index)
    }

    fn create(&self, name: &str, body: &Value) -> Answer {
        validate_index_name(name)?;
        let definition: IndexDefinition = serde_json::from_value(body.clone())
            .map_err(|e| Rejection::bad_request("parsing_exception", e.to_string()))?;

        if self.get(name).is_ok() {
            return Err(Rejection::bad_request(
                "resource_already_exists_exception",
                format!("index [{name}] already exists"),
            ));
        }

        let mut indices = self
            .indices
            .write()
            .map_err(|_| Rejection::new(500, "engine_exception", "lock poisoned"))?;
        if indices.contains_key(name) {
            return Err(Rejection::bad_request(
                "resource_already_exists_exception",
                format!("index [{name}] already exists"),
            ));
        }

        let dir = self.index_dir(name);
        let index = EmbeddedIndex::build(name, &definition, dir.as_deref())?;
        if let Some(dir) = &dir {
            let raw = serde_json::to_vec_pretty(&definition).map_err(|e| {
                Rejection::new(500, "engine_exception", e.to_string())
            })?;
            std::fs::write(dir.join(DEFINITION_FILE), raw)?;
        }
        indices.insert(name.to_string(), Arc::new(index));

        Ok(WireResponse::json(
            200,
            &json!({"acknowledged": true, "shards_acknowledged": true, "index": name}),
        ))
    }
}

impl std::fmt::Debug for EmbeddedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedService")
            .field("root", &self.registry.root)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SearchService for EmbeddedService {
    async fn info(&self) -> Result<WireResponse> {
        Ok(WireResponse::json(
            200,
            &json!({
                "name": "chaindb-embedded",
                "cluster_name": "embedded",
                "version": {
                    "number": env!("CARGO_PKG_VERSION"),
                    "build_flavor": "tantivy",
                },
            }),
        ))
    }

    async fn create_index(
        &self,
        index: &str,
        body: &Value,
    ) -> Result<WireResponse> {
        let (index, body) = (index.to_string(), body.clone());
        Ok(self.run(move |registry| registry.create(&index, &body)).await)
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        let (index, id, body) = (index.to_string(), id.to_string(), body.clone());
        Ok(self
            .run(move |registry| {
                registry
                    .get(&index)
                    .and_then(|idx| idx.put(&id, &body, refresh))
            })
            .await)
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        let (index, id) = (index.to_string(), id.to_string());
        Ok(self
            .run(move |registry| {
                registry.get(&index).and_then(|idx| idx.delete(&id, refresh))
            })
            .await)
    }

    async fn search(
        &self,
        index: &str,
        body: &Value,
        track_total_hits: bool,
    ) -> Result<WireResponse> {
        let (index, body) = (index.to_string(), body.clone());
        Ok(self
            .run(move |registry| {
                registry
                    .get(&index)
                    .and_then(|idx| idx.search(&body, track_total_hits))
            })
            .await)
    }
}

/// Index names double as directory names, so they are held to the same
/// rules a cluster applies.
fn validate_index_name(name: &str) -> std::result::Result<(), Rejection> {
    let invalid = |why: &str| -> std::result::Result<(), Rejection> {
        Err(Rejection::bad_request(
            "invalid_index_name_exception",
            format!("Invalid index name [{name}], {why}"),
        ))
    };

    if name.is_empty() || name == "." || name == ".." {
        return invalid("must not be empty, '.' or '..'");
    }
    if name.starts_with(['_', '-', '+']) {
        return invalid("must not start with '_', '-', or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if name
        .chars()
        .any(|c| matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | ',' | '#' | ':'))
    {
        return invalid(r#"must not contain the following characters [ , ", *, \, <, |, ,, >, /, ?, #, :]"#);
    }
    Ok(())
}

// -- Analysis --

enum TokenizerKind {
    Standard,
    Keyword,
    Ngram { min: usize, max: usize },
}

fn standard_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(255))
        .filter(LowerCaser)
        .build()
}

fn ngram_bounds(
    name: &str,
    def: &ComponentDef,
    max_ngram_diff: u32,
) -> std::result::Result<(usize, usize), Rejection> {
    let min = def.min_gram.unwrap_or(1);
    let max = def.max_gram.unwrap_or(2);
    if min == 0 || min > max {
        return Err(Rejection::bad_request(
            "illegal_argument_exception",
            format!("[{name}] requires 0 < min_gram <= max_gram, got {min} and {max}"),
        ));
    }
    if max - min > max_ngram_diff {
        return Err(Rejection::bad_request(
            "illegal_argument_exception",
            format!(
                "The difference between max_gram and min_gram in NGram Tokenizer must be \
                 less than or equal to: [{max_ngram_diff}] but was [{}]. This limit can be \
                 set by changing the [index.max_ngram_diff] index level setting.",
                max - min
            ),
        ));
    }
    Ok((min as usize, max as usize))
}

fn resolve_tokenizer(
    name: &str,
    analysis: &Analysis,
    max_ngram_diff: u32,
) -> std::result::Result<TokenizerKind, Rejection> {
    match (name, analysis.tokenizer.get(name)) {
        (_, Some(def)) if def.kind == "ngram" => {
            let (min, max) = ngram_bounds(name, def, max_ngram_diff)?;
            Ok(TokenizerKind::Ngram { min, max })
        }
        (_, Some(def)) if def.kind == STANDARD => Ok(TokenizerKind::Standard),
        (_, Some(def)) if def.kind == KEYWORD => Ok(TokenizerKind::Keyword),
        (STANDARD, None) => Ok(TokenizerKind::Standard),
        (KEYWORD, None) => Ok(TokenizerKind::Keyword),
        _ => Err(Rejection::bad_request(
            "illegal_argument_exception",
            format!("failed to find or support tokenizer under name [{name}]"),
        )),
    }
}

fn build_analyzer(
    name: &str,
    def: &AnalyzerDef,
    analysis: &Analysis,
    max_ngram_diff: u32,
) -> std::result::Result<TextAnalyzer, Rejection> {
    if def.kind != "custom" {
        return Err(Rejection::bad_request(
            "illegal_argument_exception",
            format!("analyzer [{name}] must be of type [custom]"),
        ));
    }

    let tokenizer = resolve_tokenizer(&def.tokenizer, analysis, max_ngram_diff)?;
    let mut lowercase = false;

    for filter in &def.filter {
        match (filter.as_str(), analysis.filter.get(filter)) {
            ("lowercase", None) => lowercase = true,
            (_, Some(f)) if f.kind == "lowercase" => lowercase = true,
            (_, Some(f)) if f.kind == "ngram" => {
                // n-grams of n-grams with the same bounds are the same set.
                let bounds = ngram_bounds(filter, f, max_ngram_diff)?;
                match tokenizer {
                    TokenizerKind::Ngram { min, max } if (min, max) == bounds => {}
                    _ => {
                        return Err(Rejection::bad_request(
                            "illegal_argument_exception",
                            format!(
                                "filter [{filter}] is only supported after an ngram \
                                 tokenizer with the same bounds"
                            ),
                        ));
                    }
                }
            }
            _ => {
                return Err(Rejection::bad_request(
                    "illegal_argument_exception",
                    format!("failed to find or support filter under name [{filter}]"),
                ));
            }
        }
    }

    let analyzer = match (tokenizer, lowercase) {
        (TokenizerKind::Ngram { min, max }, true) => {
            TextAnalyzer::builder(NgramTokenizer::new(min, max, false)?)
                .filter(LowerCaser)
                .build()
        }
        (TokenizerKind::Ngram { min, max }, false) => {
            TextAnalyzer::from(NgramTokenizer::new(min, max, false)?)
        }
        (TokenizerKind::Standard, _) => standard_analyzer(),
        (TokenizerKind::Keyword, true) => {
            TextAnalyzer::builder(RawTokenizer::default())
                .filter(LowerCaser)
                .build()
        }
        (TokenizerKind::Keyword, false) => {
            TextAnalyzer::from(RawTokenizer::default())
        }
    };
    Ok(analyzer)
}

fn text_options(analyzer: &str) -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(analyzer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

/// Tantivy field name for a mapping path such as `name.ngram`.
fn field_name(path: &str) -> String {
    path.replace('.', "__")
}

// -- Query DSL subset --

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: Option<QueryDsl>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    from: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum QueryDsl {
    MultiMatch(MultiMatchDsl),
    MatchAll(MatchAllDsl),
}

#[derive(Debug, Deserialize)]
struct MatchAllDsl {}

#[derive(Debug, Deserialize)]
struct MultiMatchDsl {
    query: String,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(rename = "type", default)]
    kind: MatchType,
    #[serde(default)]
    tie_breaker: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MatchType {
    #[default]
    BestFields,
    MostFields,
}

/// Split `name^2.5` into the field path and its boost.
fn parse_field_boost(field: &str) -> std::result::Result<(&str, f32), Rejection> {
    match field.split_once('^') {
        None => Ok((field, 1.0)),
        Some((path, boost)) => boost
            .parse::<f32>()
            .ok()
            .filter(|b| b.is_finite() && *b >= 0.0)
            .map(|b| (path, b))
            .ok_or_else(|| {
                Rejection::bad_request(
                    "parsing_exception",
                    format!("invalid boost in field [{field}]"),
                )
            }),
    }
}

/// Flatten a source value into the strings to index.
fn text_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items.iter().flat_map(text_values).collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

// -- Index --

#[derive(Debug, Clone, Copy)]
struct DocVersion {
    version: u64,
    live: bool,
}

/// One named index.
struct EmbeddedIndex {
    name: String,
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id: Field,
    version: Field,
    source: Field,
    /// Mapping path (`name`, `name.ngram`) to field.
    text_fields: HashMap<String, Field>,
    /// Top-level source property to every field indexing it.
    properties: Vec<(String, Vec<Field>)>,
    /// Versions written since open; older ones are read from the index.
    versions: Mutex<HashMap<String, DocVersion>>,
}

impl EmbeddedIndex {
    fn build(
        name: &str,
        definition: &IndexDefinition,
        dir: Option<&Path>,
    ) -> std::result::Result<Self, Rejection> {
        let settings = &definition.settings;
        let mut analyzers = vec![
            (STANDARD.to_string(), standard_analyzer()),
            (KEYWORD.to_string(), TextAnalyzer::from(RawTokenizer::default())),
        ];
        for (analyzer_name, def) in &settings.analysis.analyzer {
            analyzers.push((
                analyzer_name.clone(),
                build_analyzer(
                    analyzer_name,
                    def,
                    &settings.analysis,
                    settings.max_ngram_diff,
                )?,
            ));
        }
        let known = |a: &str| analyzers.iter().any(|(n, _)| n == a);

        let mut builder = Schema::builder();
        let id = builder.add_text_field(fields::ID, STRING | STORED);
        let version = builder.add_u64_field(fields::VERSION, STORED);
        let source = builder.add_text_field(fields::SOURCE, STORED);

        let mut text_fields = HashMap::new();
        let mut properties = Vec::new();
        for (prop, mapping) in &definition.mappings.properties {
            let mut paths = vec![(prop.clone(), mapping)];
            for (sub, sub_mapping) in &mapping.fields {
                paths.push((format!("{prop}.{sub}"), sub_mapping));
            }

            let mut prop_fields = Vec::new();
            for (path, m) in paths {
                let analyzer = match m.kind.as_str() {
                    "text" => m.analyzer.as_deref().unwrap_or(STANDARD),
                    "keyword" => KEYWORD,
                    other => {
                        return Err(Rejection::bad_request(
                            "mapper_parsing_exception",
                            format!("No handler for type [{other}] declared on field [{path}]"),
                        ));
                    }
                };
                if !known(analyzer) {
                    return Err(Rejection::bad_request(
                        "mapper_parsing_exception",
                        format!("analyzer [{analyzer}] has not been configured in mappings"),
                    ));
                }
                let field =
                    builder.add_text_field(&field_name(&path), text_options(analyzer));
                text_fields.insert(path, field);
                prop_fields.push(field);
            }
            properties.push((prop.clone(), prop_fields));
        }
        let schema = builder.build();

        let index = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Index::open_or_create(MmapDirectory::open(dir)?, schema)?
            }
            None => Index::create_in_ram(schema),
        };
        for (analyzer_name, analyzer) in analyzers {
            index.tokenizers().register(&analyzer_name, analyzer);
        }

        let writer = index.writer_with_num_threads(1, WRITER_MEMORY)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            name: name.to_string(),
            index,
            reader,
            writer: Mutex::new(writer),
            id,
            version,
            source,
            text_fields,
            properties,
            versions: Mutex::new(HashMap::new()),
        })
    }

    fn current_version(
        &self,
        cache: &HashMap<String, DocVersion>,
        id: &str,
    ) -> std::result::Result<Option<DocVersion>, Rejection> {
        if let Some(v) = cache.get(id) {
            return Ok(Some(*v));
        }

        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.id, id),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = top.first() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(*address)?;
        let version = doc.get_first(self.version).and_then(|v| v.as_u64()).unwrap_or(1);
        Ok(Some(DocVersion {
            version,
            live: true,
        }))
    }

    fn put(&self, id: &str, body: &Value, refresh: Refresh) -> Answer {
        let Value::Object(source) = body else {
            return Err(Rejection::bad_request(
                "mapper_parsing_exception",
                "failed to parse, document must be a JSON object",
            ));
        };

        let mut versions = lock(&self.versions)?;
        let previous = self.current_version(&versions, id)?;
        let created = !previous.is_some_and(|p| p.live);
        let version = previous.map_or(1, |p| p.version + 1);

        let mut doc = TantivyDocument::default();
        doc.add_text(self.id, id);
        doc.add_u64(self.version, version);
        doc.add_text(self.source, body.to_string());
        for (prop, prop_fields) in &self.properties {
            if let Some(value) = source.get(prop) {
                for text in text_values(value) {
                    for field in prop_fields {
                        doc.add_text(*field, &text);
                    }
                }
            }
        }

        {
            let mut writer = lock(&self.writer)?;
            writer.delete_term(Term::from_field_text(self.id, id));
            writer.add_document(doc)?;
            writer.commit()?;
        }
        if refresh == Refresh::Immediate {
            self.reader.reload()?;
        }
        versions.insert(
            id.to_string(),
            DocVersion {
                version,
                live: true,
            },
        );

        let (status, result) = if created {
            (201, "created")
        } else {
            (200, "updated")
        };
        Ok(self.write_answer(status, id, version, result, refresh))
    }

    fn delete(&self, id: &str, refresh: Refresh) -> Answer {
        let mut versions = lock(&self.versions)?;
        let previous = self.current_version(&versions, id)?;

        let Some(current) = previous.filter(|p| p.live) else {
            let version = previous.map_or(1, |p| p.version + 1);
            return Ok(self.write_answer(404, id, version, "not_found", refresh));
        };

        {
            let mut writer = lock(&self.writer)?;
            writer.delete_term(Term::from_field_text(self.id, id));
            writer.commit()?;
        }
        if refresh == Refresh::Immediate {
            self.reader.reload()?;
        }

        let version = current.version + 1;
        versions.insert(
            id.to_string(),
            DocVersion {
                version,
                live: false,
            },
        );
        Ok(self.write_answer(200, id, version, "deleted", refresh))
    }

    fn write_answer(
        &self,
        status: u16,
        id: &str,
        version: u64,
        result: &str,
        refresh: Refresh,
    ) -> WireResponse {
        WireResponse::json(
            status,
            &json!({
                "_index": self.name,
                "_id": id,
                "_version": version,
                "result": result,
                "forced_refresh": refresh == Refresh::Immediate,
                "_shards": {"total": 1, "successful": 1, "failed": 0},
            }),
        )
    }

    /// Analyse `text` with the analyzer of `field`, deduplicating terms.
    fn analyze(
        &self,
        field: Field,
        text: &str,
    ) -> std::result::Result<Vec<Term>, Rejection> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while let Some(token) = stream.next() {
            terms.push(Term::from_field_text(field, &token.text));
        }
        terms.sort();
        terms.dedup();
        Ok(terms)
    }

    fn compile(
        &self,
        dsl: QueryDsl,
    ) -> std::result::Result<Box<dyn Query>, Rejection> {
        let mm = match dsl {
            QueryDsl::MatchAll(_) => return Ok(Box::new(AllQuery)),
            QueryDsl::MultiMatch(mm) => mm,
        };

        let requested: Vec<String> = if mm.fields.is_empty() {
            self.text_fields.keys().cloned().collect()
        } else {
            mm.fields
        };

        let mut per_field: Vec<Box<dyn Query>> = Vec::new();
        for requested_field in &requested {
            let (path, boost) = parse_field_boost(requested_field)?;
            // Unmapped fields match nothing.
            let Some(&field) = self.text_fields.get(path) else {
                continue;
            };
            let terms = self.analyze(field, &mm.query)?;
            if terms.is_empty() {
                continue;
            }
            let query: Box<dyn Query> =
                Box::new(BooleanQuery::new_multiterms_query(terms));
            per_field.push(if boost == 1.0 {
                query
            } else {
                Box::new(BoostQuery::new(query, boost))
            });
        }

        if per_field.is_empty() {
            return Ok(Box::new(EmptyQuery));
        }
        Ok(match mm.kind {
            MatchType::BestFields => Box::new(DisjunctionMaxQuery::with_tie_breaker(
                per_field,
                mm.tie_breaker.unwrap_or(0.0),
            )),
            MatchType::MostFields => Box::new(BooleanQuery::union(per_field)),
        })
    }

    fn search(&self, body: &Value, track_total_hits: bool) -> Answer {
        let started = Instant::now();
        let request: SearchRequest = serde_json::from_value(body.clone())
            .map_err(|e| Rejection::bad_request("parsing_exception", e.to_string()))?;
        let query =
            self.compile(request.query.unwrap_or(QueryDsl::MatchAll(MatchAllDsl {})))?;
        let size = request.size.unwrap_or(DEFAULT_SIZE);
        let from = request.from.unwrap_or(0);

        let searcher = self.reader.searcher();
        let (top, total) = if size == 0 {
            (Vec::new(), searcher.search(&*query, &Count)?)
        } else {
            searcher.search(
                &*query,
                &(TopDocs::with_limit(size).and_offset(from), Count),
            )?
        };

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in &top {
            let doc: TantivyDocument = searcher.doc(*address)?;
            let id = doc
                .get_first(self.id)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let source = doc
                .get_first(self.source)
                .and_then(|v| v.as_str())
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .unwrap_or(Value::Null);
            hits.push(json!({
                "_index": self.name,
                "_id": id,
                "_score": score,
                "_source": source,
            }));
        }

        let total = if track_total_hits || total <= TOTAL_HITS_LIMIT {
            json!({"value": total, "relation": "eq"})
        } else {
            json!({"value": TOTAL_HITS_LIMIT, "relation": "gte"})
        };

        Ok(WireResponse::json(
            200,
            &json!({
                "took": started.elapsed().as_millis() as u64,
                "timed_out": false,
                "hits": {
                    "total": total,
                    "max_score": top.first().map(|(score, _)| *score),
                    "hits": hits,
                },
            }),
        ))
    }
}

impl std::fmt::Debug for EmbeddedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedIndex")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
