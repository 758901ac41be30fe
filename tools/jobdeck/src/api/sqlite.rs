use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::{DocumentReply, JobApi, JobPage, PageRequest, ProcessReply, RemoteReply, ReplyStatus};
use crate::config::{AppConfig, DocumentConfig, RestoreTarget, TailorConfig};
use crate::errors::DeckError;
use crate::job_identity::{resolve_job_id, JobIdentity};
use crate::logging::append_run_log;
use crate::runtime::{Clock, FileSystem, ProcessRunner};
use crate::tailor::{
    artifact_file_name, build_prompt, document_file_name, parse_completion, prompt_file_name,
    CommandTemplate, PromptInputs,
};
use crate::types::{
    ArtifactVariant, Job, JobDetail, JobId, ModelConfig, PipelineStats, SkillTag, Stage,
    StatCounter, StatCounters, TagCategory,
};

const READ_POOL_SIZE: usize = 4;

type StoreResult<T> = Result<T, DeckError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SqliteJobApiOptions {
    pub db_path: PathBuf,
    pub restore_target: RestoreTarget,
    pub tailor: TailorConfig,
    pub document: DocumentConfig,
}

impl SqliteJobApiOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            db_path: cfg.store.db_path.clone(),
            restore_target: cfg.lifecycle.restore_target,
            tailor: cfg.tailor.clone(),
            document: cfg.document.clone(),
        }
    }
}

/// A posting as handed over by an importer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewJob {
    pub key: Option<String>,
    pub title: String,
    pub company: String,
    pub city: String,
    pub pay: String,
    pub job_url: String,
    pub score: i64,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub id: JobId,
    pub inserted: bool,
    pub auto_denied: bool,
}

#[derive(Debug, Clone, Copy)]
enum StageMove {
    Approve,
    Deny,
    Restore(RestoreTarget),
}

#[derive(Debug)]
enum WriteCmd {
    MoveStage {
        id: JobId,
        change: StageMove,
        now: i64,
        reply: oneshot::Sender<StoreResult<Stage>>,
    },
    HarvestTag {
        id: JobId,
        name: String,
        category: TagCategory,
        now: i64,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    Reject {
        term: String,
        now: i64,
        reply: oneshot::Sender<StoreResult<usize>>,
    },
    Insert {
        job: NewJob,
        now: i64,
        reply: oneshot::Sender<StoreResult<InsertOutcome>>,
    },
    RecordArtifact {
        id: JobId,
        path: String,
        count_as_processed: bool,
        now: i64,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    RecordDelivery {
        id: JobId,
        path: String,
        now: i64,
        reply: oneshot::Sender<StoreResult<()>>,
    },
}

#[derive(Debug, Clone)]
struct JobRecord {
    title: String,
    stage: Stage,
    description: String,
    artifact_path: Option<String>,
}

/// `JobApi` over a local SQLite database. Writes go through one writer
/// thread; reads use a small pool of read-only connections.
pub struct SqliteJobApi {
    write_tx: Option<mpsc::Sender<WriteCmd>>,
    read_pool: ReadPool,
    writer_join: Option<thread::JoinHandle<()>>,
    options: SqliteJobApiOptions,
    session: Mutex<StatCounters>,
    clock: Arc<dyn Clock>,
    file_system: Arc<dyn FileSystem>,
    process_runner: Arc<dyn ProcessRunner>,
}

impl Drop for SqliteJobApi {
    fn drop(&mut self) {
        drop(self.write_tx.take());
        if let Some(handle) = self.writer_join.take() {
            let _ = handle.join();
        }
    }
}

impl SqliteJobApi {
    pub fn open(
        options: SqliteJobApiOptions,
        clock: Arc<dyn Clock>,
        file_system: Arc<dyn FileSystem>,
        process_runner: Arc<dyn ProcessRunner>,
    ) -> StoreResult<Self> {
        let path = options.db_path.clone();
        append_run_log(
            "info",
            "store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeckError::Database(e.to_string()))?;
        }

        let existed_before_open = path.exists();
        if existed_before_open {
            let meta =
                std::fs::metadata(&path).map_err(|e| DeckError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(DeckError::Database(format!(
                    "job database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let mut write_conn = Connection::open(&path).map_err(db_err)?;
        configure_write_connection(&write_conn)?;
        if existed_before_open {
            let integrity: String = write_conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(DeckError::Database(format!(
                    "job database failed integrity check: {integrity}"
                )));
            }
        }
        run_migrations(&mut write_conn, unix_seconds(clock.as_ref()))?;

        let (write_tx, mut write_rx) = mpsc::channel(64);
        let writer_join = thread::spawn(move || {
            while let Some(cmd) = write_rx.blocking_recv() {
                match cmd {
                    WriteCmd::MoveStage {
                        id,
                        change,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(move_stage(&mut write_conn, &id, change, now));
                    }
                    WriteCmd::HarvestTag {
                        id,
                        name,
                        category,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(harvest_tag(&write_conn, &id, &name, category, now));
                    }
                    WriteCmd::Reject { term, now, reply } => {
                        let _ = reply.send(reject_term(&mut write_conn, &term, now));
                    }
                    WriteCmd::Insert { job, now, reply } => {
                        let _ = reply.send(insert_job(&mut write_conn, &job, now));
                    }
                    WriteCmd::RecordArtifact {
                        id,
                        path,
                        count_as_processed,
                        now,
                        reply,
                    } => {
                        let result =
                            record_artifact(&mut write_conn, &id, &path, count_as_processed, now);
                        let _ = reply.send(result);
                    }
                    WriteCmd::RecordDelivery {
                        id,
                        path,
                        now,
                        reply,
                    } => {
                        let _ = reply.send(record_delivery(&mut write_conn, &id, &path, now));
                    }
                }
            }
        });

        let read_pool = ReadPool::open(&path, READ_POOL_SIZE)?;
        append_run_log(
            "info",
            "store.opened",
            json!({ "path": path.display().to_string() }),
        );
        Ok(Self {
            write_tx: Some(write_tx),
            read_pool,
            writer_join: Some(writer_join),
            options,
            session: Mutex::new(StatCounters::default()),
            clock,
            file_system,
            process_runner,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.options.db_path
    }

    /// Seeds one posting. Existing ids are left untouched; postings matching
    /// the blacklist enter DENIED with `auto_denied` set.
    pub fn insert_job(&self, job: NewJob) -> StoreResult<InsertOutcome> {
        let now = self.now();
        let outcome = self.write(|reply| WriteCmd::Insert { job, now, reply })?;
        append_run_log(
            "debug",
            "store.job.inserted",
            json!({
                "job_id": outcome.id.as_str(),
                "inserted": outcome.inserted,
                "auto_denied": outcome.auto_denied,
            }),
        );
        Ok(outcome)
    }

    fn now(&self) -> i64 {
        unix_seconds(self.clock.as_ref())
    }

    fn write<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> WriteCmd,
    ) -> StoreResult<T> {
        let sender = self
            .write_tx
            .as_ref()
            .ok_or_else(|| DeckError::Database("store is closed".to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .blocking_send(build(reply_tx))
            .map_err(|e| DeckError::Database(e.to_string()))?;
        reply_rx
            .blocking_recv()
            .map_err(|e| DeckError::Database(e.to_string()))?
    }

    fn bump_session(&self, counter: StatCounter) {
        if let Ok(mut session) = self.session.lock() {
            session.bump(counter);
        }
    }

    fn job_record(&self, id: &JobId) -> StoreResult<JobRecord> {
        self.read_pool.with_conn(|conn| {
            conn.query_row(
                "SELECT title, stage, description, artifact_path FROM jobs WHERE id = ?1",
                [id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?
            .map(|(title, stage, description, artifact_path)| {
                Ok(JobRecord {
                    title,
                    stage: parse_stage(&stage)?,
                    description,
                    artifact_path,
                })
            })
            .unwrap_or_else(|| Err(DeckError::NotFound(format!("job {id}"))))
        })
    }

    fn categorized(&self, category: TagCategory) -> StoreResult<Vec<String>> {
        self.read_pool.with_conn(|conn| {
            let mut statement = conn
                .prepare(
                    "SELECT name FROM tag_categories
                      WHERE category = ?1
                      ORDER BY categorized_at ASC, name ASC",
                )
                .map_err(db_err)?;
            let rows = statement
                .query_map([category.as_str()], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    fn move_job(&self, id: &JobId, change: StageMove) -> StoreResult<RemoteReply> {
        let now = self.now();
        let target = self.write(|reply| WriteCmd::MoveStage {
            id: id.clone(),
            change,
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "store.stage.moved",
            json!({ "job_id": id.as_str(), "to": target.as_str() }),
        );
        Ok(RemoteReply::ok_with(target.as_str()))
    }
}

impl JobApi for SqliteJobApi {
    fn list_jobs(&self, stage: Stage, page: Option<PageRequest>) -> Result<JobPage, DeckError> {
        let (limit, offset) = page.map_or((-1_i64, 0_i64), |page| {
            (i64::from(page.limit), i64::from(page.offset))
        });
        self.read_pool.with_conn(|conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE stage = ?1",
                    [stage.as_str()],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            let mut statement = conn
                .prepare(
                    "SELECT id, stage, title, company, city, pay, job_url, score,
                            artifact_path IS NOT NULL, document_path IS NOT NULL, auto_denied,
                            previous_stage
                       FROM jobs
                      WHERE stage = ?1
                      ORDER BY score DESC, created_at ASC, rowid ASC
                      LIMIT ?2 OFFSET ?3",
                )
                .map_err(db_err)?;
            let rows = statement
                .query_map(params![stage.as_str(), limit, offset], |row| {
                    let job = Job {
                        id: JobId::new(row.get::<_, String>(0)?),
                        stage,
                        title: row.get(2)?,
                        company: row.get(3)?,
                        city: row.get(4)?,
                        pay: row.get(5)?,
                        job_url: row.get(6)?,
                        score: row.get(7)?,
                        has_ai_artifact: row.get(8)?,
                        has_pdf_artifact: row.get(9)?,
                        auto_denied: row.get(10)?,
                        previous_stage: row
                            .get::<_, Option<String>>(11)?
                            .as_deref()
                            .and_then(Stage::parse),
                    };
                    Ok((row.get::<_, String>(1)?, job))
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            let jobs = rows
                .into_iter()
                .map(|(stored, job)| {
                    // A row whose stored stage drifted from the query is a corrupt row.
                    if parse_stage(&stored)? != job.stage {
                        return Err(DeckError::Database(format!("job {} stage drifted", job.id)));
                    }
                    Ok(job)
                })
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(JobPage {
                jobs,
                total: usize::try_from(total).unwrap_or_default(),
            })
        })
    }

    fn job_detail(&self, id: &JobId) -> Result<JobDetail, DeckError> {
        self.read_pool.with_conn(|conn| {
            let (description, url) = conn
                .query_row(
                    "SELECT description, job_url FROM jobs WHERE id = ?1",
                    [id.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
            let mut statement = conn
                .prepare(
                    "SELECT t.name, c.category
                       FROM job_tags t
                       LEFT JOIN tag_categories c ON c.name_key = lower(t.name)
                      WHERE t.job_id = ?1
                        AND lower(t.name) NOT IN (SELECT term FROM blacklist)
                      ORDER BY t.position ASC",
                )
                .map_err(db_err)?;
            let skills = statement
                .query_map([id.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?
                .into_iter()
                .map(|(name, category)| SkillTag {
                    name,
                    category: category
                        .as_deref()
                        .and_then(TagCategory::parse)
                        .unwrap_or(TagCategory::Unsorted),
                })
                .collect();
            Ok(JobDetail {
                description,
                skills,
                url,
            })
        })
    }

    fn approve(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        let reply = self.move_job(id, StageMove::Approve)?;
        self.bump_session(StatCounter::Approved);
        Ok(reply)
    }

    fn deny(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        let reply = self.move_job(id, StageMove::Deny)?;
        self.bump_session(StatCounter::Denied);
        Ok(reply)
    }

    fn restore(&self, id: &JobId) -> Result<RemoteReply, DeckError> {
        self.move_job(id, StageMove::Restore(self.options.restore_target))
    }

    fn process(&self, id: &JobId, config: &ModelConfig) -> Result<ProcessReply, DeckError> {
        config.validate()?;
        let record = self.job_record(id)?;
        if record.stage != Stage::Approved {
            return Err(DeckError::Precondition(format!(
                "job {id} is {}, not APPROVED",
                record.stage.as_str()
            )));
        }

        let tailor = &self.options.tailor;
        let resume = self.file_system.read_to_string(&tailor.resume_path).ok();
        let qualifications = self.categorized(TagCategory::Qualifications)?;
        let skills = self.categorized(TagCategory::Skills)?;
        let prompt = build_prompt(&PromptInputs {
            resume: resume.as_deref(),
            qualifications: &qualifications,
            skills: &skills,
            description: &record.description,
            instructions: config.prompt_override.as_deref(),
        });

        self.file_system.create_dir_all(&tailor.artifact_dir)?;
        let prompt_path = tailor
            .artifact_dir
            .join(prompt_file_name(&record.title, id));
        self.file_system.write_string(&prompt_path, &prompt)?;

        let temperature = format!("{:.2}", config.temperature);
        let prompt_file = prompt_path.display().to_string();
        let request = CommandTemplate {
            program: tailor.program.clone(),
            args: tailor.args.clone(),
        }
        .render(
            &[
                ("model", config.model.as_str()),
                ("temperature", temperature.as_str()),
                ("prompt_file", prompt_file.as_str()),
            ],
            None,
        );

        append_run_log(
            "info",
            "store.tailor.started",
            json!({ "job_id": id.as_str(), "model": config.model, "program": request.program }),
        );
        let started = self.clock.now();
        let output = self.process_runner.run(request)?;
        let duration_seconds = self
            .clock
            .now()
            .duration_since(started)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();

        if output.exit_code != 0 {
            let message = format!(
                "completion exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
            append_run_log(
                "warn",
                "store.tailor.failed",
                json!({ "job_id": id.as_str(), "message": message }),
            );
            return Ok(ProcessReply::failed(message));
        }
        let body = match parse_completion(&output.stdout, tailor.require_json) {
            Ok(body) => body,
            Err(message) => {
                append_run_log(
                    "warn",
                    "store.tailor.failed",
                    json!({ "job_id": id.as_str(), "message": message }),
                );
                return Ok(ProcessReply::failed(message));
            }
        };

        let artifact_path = tailor
            .artifact_dir
            .join(artifact_file_name(&record.title, id));
        self.file_system.write_string(&artifact_path, &body)?;
        let path = artifact_path.display().to_string();
        let now = self.now();
        self.write(|reply| WriteCmd::RecordArtifact {
            id: id.clone(),
            path: path.clone(),
            count_as_processed: true,
            now,
            reply,
        })?;
        self.bump_session(StatCounter::Processed);
        append_run_log(
            "info",
            "store.tailor.completed",
            json!({
                "job_id": id.as_str(),
                "artifact_path": path,
                "duration_seconds": duration_seconds,
            }),
        );

        Ok(ProcessReply {
            status: ReplyStatus::Ok,
            artifact_path: Some(path),
            duration_seconds: Some(duration_seconds),
            document_path: None,
            message: None,
        })
    }

    fn harvest_tag(
        &self,
        id: &JobId,
        tag: &str,
        category: TagCategory,
    ) -> Result<RemoteReply, DeckError> {
        if !category.is_sorted() {
            return Err(DeckError::Input(
                "tags can only be harvested into a sorted category".to_string(),
            ));
        }
        let now = self.now();
        self.write(|reply| WriteCmd::HarvestTag {
            id: id.clone(),
            name: tag.to_string(),
            category,
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "store.tag.harvested",
            json!({ "job_id": id.as_str(), "tag": tag, "category": category.as_str() }),
        );
        Ok(RemoteReply::ok())
    }

    fn reject(&self, term: &str) -> Result<RemoteReply, DeckError> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Err(DeckError::Input("blacklist term must not be blank".to_string()));
        }
        let now = self.now();
        let denied = self.write(|reply| WriteCmd::Reject {
            term: term.clone(),
            now,
            reply,
        })?;
        append_run_log(
            "info",
            "store.blacklist.added",
            json!({ "term": term, "auto_denied": denied }),
        );
        Ok(RemoteReply::ok_with(format!("{denied} jobs auto-denied")))
    }

    fn artifact(&self, id: &JobId, variant: ArtifactVariant) -> Result<String, DeckError> {
        let record = self.job_record(id)?;
        let path = record.artifact_path.ok_or_else(|| {
            DeckError::NotFound(format!("no {} artifact for job {id}", variant.as_str()))
        })?;
        self.file_system.read_to_string(Path::new(&path))
    }

    fn save_artifact(&self, id: &JobId, content: &str) -> Result<RemoteReply, DeckError> {
        let record = self.job_record(id)?;
        let artifact_dir = &self.options.tailor.artifact_dir;
        let path = match record.artifact_path {
            Some(path) => PathBuf::from(path),
            None => {
                self.file_system.create_dir_all(artifact_dir)?;
                artifact_dir.join(artifact_file_name(&record.title, id))
            }
        };
        self.file_system.write_string(&path, content)?;
        let path = path.display().to_string();
        let now = self.now();
        self.write(|reply| WriteCmd::RecordArtifact {
            id: id.clone(),
            path: path.clone(),
            count_as_processed: false,
            now,
            reply,
        })?;
        Ok(RemoteReply::ok_with(path))
    }

    fn generate_document(&self, id: &JobId) -> Result<DocumentReply, DeckError> {
        let record = self.job_record(id)?;
        if record.stage != Stage::Approved {
            return Err(DeckError::Precondition(format!(
                "job {id} is {}, not APPROVED",
                record.stage.as_str()
            )));
        }
        let artifact_path = record
            .artifact_path
            .ok_or_else(|| DeckError::Precondition(format!("job {id} has no artifact")))?;

        let document = &self.options.document;
        self.file_system.create_dir_all(&document.output_dir)?;
        let output = document
            .output_dir
            .join(document_file_name(&record.title, id))
            .display()
            .to_string();
        let request = CommandTemplate {
            program: document.program.clone(),
            args: document.args.clone(),
        }
        .render(
            &[
                ("artifact", artifact_path.as_str()),
                ("output", output.as_str()),
            ],
            None,
        );
        let result = self.process_runner.run(request)?;
        if result.exit_code != 0 {
            let message = format!(
                "document renderer exited with {}: {}",
                result.exit_code,
                result.stderr.trim()
            );
            append_run_log(
                "warn",
                "store.document.failed",
                json!({ "job_id": id.as_str(), "message": message }),
            );
            return Ok(DocumentReply::failed(message));
        }

        let now = self.now();
        self.write(|reply| WriteCmd::RecordDelivery {
            id: id.clone(),
            path: output.clone(),
            now,
            reply,
        })?;
        self.bump_session(StatCounter::Delivered);
        append_run_log(
            "info",
            "store.document.rendered",
            json!({ "job_id": id.as_str(), "path": output }),
        );
        Ok(DocumentReply::created(output))
    }

    fn stats(&self) -> Result<PipelineStats, DeckError> {
        let all_time = self.read_pool.with_conn(|conn| {
            let mut statement = conn
                .prepare("SELECT counter, total FROM pipeline_counters")
                .map_err(db_err)?;
            let rows = statement
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            let mut counters = StatCounters::default();
            for (name, total) in rows {
                let total = u64::try_from(total).unwrap_or_default();
                match StatCounter::parse(&name) {
                    Some(StatCounter::Approved) => counters.approved = total,
                    Some(StatCounter::Denied) => counters.denied = total,
                    Some(StatCounter::Processed) => counters.processed = total,
                    Some(StatCounter::Delivered) => counters.delivered = total,
                    None => {}
                }
            }
            Ok(counters)
        })?;
        let session = self
            .session
            .lock()
            .map(|session| *session)
            .map_err(|_| DeckError::Database("session counters poisoned".to_string()))?;
        Ok(PipelineStats { session, all_time })
    }
}

#[derive(Clone)]
struct ReadPool {
    conns: Arc<Vec<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> StoreResult<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(db_err)?;
            conn.busy_timeout(Duration::from_secs(3)).map_err(db_err)?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns: Arc::new(conns),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx]
            .lock()
            .map_err(|_| DeckError::Database("read connection lock poisoned".to_string()))?;
        f(&guard)
    }
}

fn configure_write_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(db_err)?;
    conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection, now: i64) -> StoreResult<()> {
    let migrations = [
        (1_i64, include_str!("../../migrations/0001_jobs.sql")),
        (2_i64, include_str!("../../migrations/0002_counters.sql")),
    ];

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )
    .map_err(db_err)?;

    for (version, sql) in migrations {
        let applied = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();
        if applied {
            continue;
        }

        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, now],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "store.migration.applied",
            json!({ "version": version }),
        );
    }
    Ok(())
}

fn move_stage(conn: &mut Connection, id: &JobId, change: StageMove, now: i64) -> StoreResult<Stage> {
    let tx = conn.transaction().map_err(db_err)?;
    let (current, previous) = tx
        .query_row(
            "SELECT stage, previous_stage FROM jobs WHERE id = ?1",
            [id.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| DeckError::NotFound(format!("job {id}")))?;
    let current = parse_stage(&current)?;

    let (allowed, target, counter): (&[Stage], Stage, Option<StatCounter>) = match change {
        StageMove::Approve => (&[Stage::New], Stage::Approved, Some(StatCounter::Approved)),
        StageMove::Deny => (
            &[Stage::New, Stage::Approved],
            Stage::Denied,
            Some(StatCounter::Denied),
        ),
        StageMove::Restore(restore) => (
            &[Stage::Denied],
            restore.resolve(previous.as_deref().and_then(Stage::parse)),
            None,
        ),
    };
    if !allowed.contains(&current) {
        return Err(DeckError::Precondition(format!(
            "job {id} is {}; cannot move to {}",
            current.as_str(),
            target.as_str()
        )));
    }

    tx.execute(
        "UPDATE jobs
            SET stage = ?2, previous_stage = ?3, auto_denied = 0, updated_at = ?4
          WHERE id = ?1",
        params![id.as_str(), target.as_str(), current.as_str(), now],
    )
    .map_err(db_err)?;
    if let Some(counter) = counter {
        bump_counter(&tx, counter)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(target)
}

fn harvest_tag(
    conn: &Connection,
    id: &JobId,
    name: &str,
    category: TagCategory,
    now: i64,
) -> StoreResult<()> {
    let on_job = conn
        .query_row(
            "SELECT 1 FROM job_tags WHERE job_id = ?1 AND name = ?2",
            params![id.as_str(), name],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if !on_job {
        return Err(DeckError::NotFound(format!("tag `{name}` on job {id}")));
    }
    let key = name.to_lowercase();
    let settled = conn
        .query_row(
            "SELECT 1 FROM tag_categories WHERE name_key = ?1
             UNION ALL
             SELECT 1 FROM blacklist WHERE term = ?1",
            [key.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if settled {
        return Err(DeckError::NotFound(format!("unsorted tag `{name}`")));
    }
    conn.execute(
        "INSERT INTO tag_categories(name_key, name, category, categorized_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![key, name, category.as_str(), now],
    )
    .map_err(db_err)?;
    Ok(())
}

fn reject_term(conn: &mut Connection, term: &str, now: i64) -> StoreResult<usize> {
    let tx = conn.transaction().map_err(db_err)?;
    tx.execute(
        "INSERT OR IGNORE INTO blacklist(term, created_at) VALUES (?1, ?2)",
        params![term, now],
    )
    .map_err(db_err)?;
    let denied = tx
        .execute(
            "UPDATE jobs
                SET stage = 'DENIED', previous_stage = stage, auto_denied = 1, updated_at = ?2
              WHERE stage = 'NEW'
                AND (instr(lower(title), ?1) > 0 OR instr(lower(company), ?1) > 0)",
            params![term, now],
        )
        .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(denied)
}

fn insert_job(conn: &mut Connection, job: &NewJob, now: i64) -> StoreResult<InsertOutcome> {
    let id = resolve_job_id(
        job.key.as_deref(),
        &JobIdentity {
            title: job.title.clone(),
            company: job.company.clone(),
            url: job.job_url.clone(),
        },
    );
    let tx = conn.transaction().map_err(db_err)?;
    let exists = tx
        .query_row("SELECT 1 FROM jobs WHERE id = ?1", [id.as_str()], |_| Ok(()))
        .optional()
        .map_err(db_err)?
        .is_some();
    if exists {
        return Ok(InsertOutcome {
            id,
            inserted: false,
            auto_denied: false,
        });
    }

    let auto_denied = is_blacklisted(&tx, &job.title, &job.company)?;
    let stage = if auto_denied { Stage::Denied } else { Stage::New };
    tx.execute(
        "INSERT INTO jobs (
            id, title, company, city, pay, job_url, score, stage, previous_stage,
            auto_denied, description, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            id.as_str(),
            job.title,
            job.company,
            job.city,
            job.pay,
            job.job_url,
            job.score,
            stage.as_str(),
            auto_denied.then_some(Stage::New.as_str()),
            auto_denied,
            job.description,
            now,
        ],
    )
    .map_err(db_err)?;
    for (position, name) in job.tags.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        tx.execute(
            "INSERT OR IGNORE INTO job_tags(job_id, name, position) VALUES (?1, ?2, ?3)",
            params![id.as_str(), name, position as i64],
        )
        .map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(InsertOutcome {
        id,
        inserted: true,
        auto_denied,
    })
}

fn is_blacklisted(tx: &Transaction<'_>, title: &str, company: &str) -> StoreResult<bool> {
    let title = title.to_lowercase();
    let company = company.to_lowercase();
    let mut statement = tx.prepare("SELECT term FROM blacklist").map_err(db_err)?;
    let terms = statement
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(terms
        .iter()
        .any(|term| title.contains(term.as_str()) || company.contains(term.as_str())))
}

fn record_artifact(
    conn: &mut Connection,
    id: &JobId,
    path: &str,
    count_as_processed: bool,
    now: i64,
) -> StoreResult<()> {
    let tx = conn.transaction().map_err(db_err)?;
    let updated = tx
        .execute(
            "UPDATE jobs SET artifact_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), path, now],
        )
        .map_err(db_err)?;
    if updated == 0 {
        return Err(DeckError::NotFound(format!("job {id}")));
    }
    if count_as_processed {
        bump_counter(&tx, StatCounter::Processed)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}

fn record_delivery(conn: &mut Connection, id: &JobId, path: &str, now: i64) -> StoreResult<()> {
    let tx = conn.transaction().map_err(db_err)?;
    let updated = tx
        .execute(
            "UPDATE jobs
                SET document_path = ?2, stage = 'DELIVERED', previous_stage = stage, updated_at = ?3
              WHERE id = ?1 AND stage = 'APPROVED'",
            params![id.as_str(), path, now],
        )
        .map_err(db_err)?;
    if updated == 0 {
        return Err(DeckError::Precondition(format!(
            "job {id} is no longer APPROVED"
        )));
    }
    bump_counter(&tx, StatCounter::Delivered)?;
    tx.commit().map_err(db_err)?;
    Ok(())
}

fn bump_counter(tx: &Transaction<'_>, counter: StatCounter) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO pipeline_counters(counter, total) VALUES (?1, 1)
         ON CONFLICT(counter) DO UPDATE SET total = total + 1",
        [counter.as_str()],
    )
    .map_err(db_err)?;
    Ok(())
}

fn parse_stage(value: &str) -> StoreResult<Stage> {
    Stage::parse(value).ok_or_else(|| DeckError::Database(format!("unknown stage `{value}`")))
}

fn unix_seconds(clock: &dyn Clock) -> i64 {
    clock
        .now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

fn db_err(error: rusqlite::Error) -> DeckError {
    DeckError::Database(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeClock, FakeFileSystem, FakeProcessRunner, ProcessOutput};
    use std::time::SystemTime;

    fn open_api(dir: &Path, fs: FakeFileSystem, runner: FakeProcessRunner) -> SqliteJobApi {
        let mut cfg = AppConfig::default();
        cfg.store.db_path = dir.join("jobs.sqlite3");
        cfg.tailor.artifact_dir = PathBuf::from("/artifacts");
        cfg.tailor.resume_path = PathBuf::from("/resume.txt");
        cfg.document.output_dir = PathBuf::from("/done");
        SqliteJobApi::open(
            SqliteJobApiOptions::from_config(&cfg),
            Arc::new(FakeClock::ticking(
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                Duration::from_secs(2),
            )),
            Arc::new(fs),
            Arc::new(runner),
        )
        .expect("open")
    }

    fn posting(key: &str, title: &str, tags: &[&str]) -> NewJob {
        NewJob {
            key: Some(key.to_string()),
            title: title.to_string(),
            company: "Acme".to_string(),
            score: 50,
            description: format!("{title} description"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..NewJob::default()
        }
    }

    #[test]
    fn migrations_are_recorded_and_reopen_is_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let api = open_api(dir.path(), FakeFileSystem::default(), FakeProcessRunner::default());
            api.insert_job(posting("J1", "Rust Engineer", &[])).expect("insert");
        }
        let api = open_api(dir.path(), FakeFileSystem::default(), FakeProcessRunner::default());
        let page = api.list_jobs(Stage::New, None).expect("list");
        assert_eq!(page.total, 1);
        let versions: i64 = api
            .read_pool
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
                    .map_err(db_err)
            })
            .expect("versions");
        assert_eq!(versions, 2);
    }

    #[test]
    fn zero_byte_database_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("jobs.sqlite3"), b"").expect("touch");
        let mut cfg = AppConfig::default();
        cfg.store.db_path = dir.path().join("jobs.sqlite3");
        let err = SqliteJobApi::open(
            SqliteJobApiOptions::from_config(&cfg),
            Arc::new(FakeClock::default()),
            Arc::new(FakeFileSystem::default()),
            Arc::new(FakeProcessRunner::default()),
        )
        .err()
        .expect("corrupt db must fail");
        assert!(matches!(err, DeckError::Database(_)));
    }

    #[test]
    fn restore_to_previous_stage_when_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = AppConfig::default();
        cfg.store.db_path = dir.path().join("jobs.sqlite3");
        cfg.lifecycle.restore_target = RestoreTarget::Previous;
        let api = SqliteJobApi::open(
            SqliteJobApiOptions::from_config(&cfg),
            Arc::new(FakeClock::default()),
            Arc::new(FakeFileSystem::default()),
            Arc::new(FakeProcessRunner::default()),
        )
        .expect("open");
        let id = api.insert_job(posting("J1", "Rust Engineer", &[])).expect("insert").id;

        api.approve(&id).expect("approve");
        api.deny(&id).expect("deny");
        let denied = api.list_jobs(Stage::Denied, None).expect("denied");
        assert_eq!(denied.jobs[0].previous_stage, Some(Stage::Approved));
        api.restore(&id).expect("restore");
        let approved = api.list_jobs(Stage::Approved, None).expect("list");
        assert_eq!(approved.jobs.len(), 1);

        let err = api.restore(&id).expect_err("not denied");
        assert!(matches!(err, DeckError::Precondition(_)));
        let err = api.approve(&JobId::from("ghost")).expect_err("missing");
        assert!(matches!(err, DeckError::NotFound(_)));
    }

    #[test]
    fn tag_categories_are_global_and_harvest_happens_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let api = open_api(dir.path(), FakeFileSystem::default(), FakeProcessRunner::default());
        let a = api.insert_job(posting("A", "Platform", &["Kubernetes", "Go"])).expect("a").id;
        let b = api.insert_job(posting("B", "SRE", &["kubernetes"])).expect("b").id;

        api.harvest_tag(&a, "Kubernetes", TagCategory::Skills)
            .expect("harvest");
        let err = api
            .harvest_tag(&a, "Kubernetes", TagCategory::Benefits)
            .expect_err("already sorted");
        assert!(matches!(err, DeckError::NotFound(_)));

        let detail = api.job_detail(&b).expect("detail");
        assert_eq!(detail.skills[0].category, TagCategory::Skills);
        let err = api
            .harvest_tag(&a, "Go", TagCategory::Unsorted)
            .expect_err("unsorted target");
        assert!(matches!(err, DeckError::Input(_)));
    }

    #[test]
    fn reject_hides_tags_and_auto_denies_matching_new_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let api = open_api(dir.path(), FakeFileSystem::default(), FakeProcessRunner::default());
        let keep = api.insert_job(posting("K", "Rust Engineer", &["Unpaid", "Rust"])).expect("k").id;
        api.insert_job(posting("S", "Sales Associate", &[])).expect("s");

        let reply = api.reject("SALES").expect("reject");
        assert_eq!(reply.message.as_deref(), Some("1 jobs auto-denied"));
        api.reject("unpaid").expect("reject tag");

        let denied = api.list_jobs(Stage::Denied, None).expect("denied");
        assert_eq!(denied.jobs.len(), 1);
        assert!(denied.jobs[0].auto_denied);
        let detail = api.job_detail(&keep).expect("detail");
        assert_eq!(detail.skills.len(), 1);
        assert_eq!(detail.skills[0].name, "Rust");

        let late = api.insert_job(posting("L", "Inside Sales Rep", &[])).expect("late");
        assert!(late.auto_denied);
        assert!(matches!(api.reject("  "), Err(DeckError::Input(_))));
    }

    #[test]
    fn process_writes_artifact_and_deliver_renders_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = FakeFileSystem::with_file("/resume.txt", "Ten years of Rust.");
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: "{\"summary\":\"tailored\"}".to_string(),
            stderr: String::new(),
        }));
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }));
        let api = open_api(dir.path(), fs.clone(), runner.clone());
        let id = api.insert_job(posting("J9", "Data/ML Lead", &["PhD"])).expect("insert").id;
        api.harvest_tag(&id, "PhD", TagCategory::Qualifications)
            .expect("harvest");

        let config = AppConfig::default().model_config();
        let err = api.process(&id, &config).expect_err("not approved");
        assert!(matches!(err, DeckError::Precondition(_)));

        api.approve(&id).expect("approve");
        let reply = api.process(&id, &config).expect("process");
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.artifact_path.as_deref(), Some("/artifacts/DataML Lead_J9.json"));
        assert_eq!(reply.duration_seconds, Some(2.0));
        let prompt = fs
            .file(Path::new("/artifacts/DataML Lead_J9.prompt.txt"))
            .expect("prompt written");
        assert!(prompt.contains("Ten years of Rust."));
        assert!(prompt.contains("MY QUALIFICATIONS: PhD"));
        assert_eq!(
            api.artifact(&id, ArtifactVariant::Primary).expect("artifact"),
            "{\"summary\":\"tailored\"}"
        );

        let doc = api.generate_document(&id).expect("document");
        assert_eq!(doc.path.as_deref(), Some("/done/DataML Lead_J9.pdf"));
        let delivered = api.list_jobs(Stage::Delivered, None).expect("delivered");
        assert!(delivered.jobs[0].has_ai_artifact && delivered.jobs[0].has_pdf_artifact);

        let requests = runner.requests();
        assert_eq!(requests[0].program, "jobdeck-tailor");
        assert!(requests[0].args.contains(&config.model));
        assert_eq!(
            requests[1].args,
            vec!["/artifacts/DataML Lead_J9.json", "/done/DataML Lead_J9.pdf"]
        );

        let stats = api.stats().expect("stats");
        assert_eq!(stats.all_time.approved, 1);
        assert_eq!(stats.all_time.processed, 1);
        assert_eq!(stats.session.delivered, 1);
    }

    #[test]
    fn failed_completion_is_a_status_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 3,
            stdout: String::new(),
            stderr: "rate limited\n".to_string(),
        }));
        let api = open_api(dir.path(), FakeFileSystem::default(), runner);
        let id = api.insert_job(posting("J1", "Rust", &[])).expect("insert").id;
        api.approve(&id).expect("approve");

        let reply = api
            .process(&id, &AppConfig::default().model_config())
            .expect("reply");
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(
            reply.message.as_deref(),
            Some("completion exited with 3: rate limited")
        );
        let err = api.generate_document(&id).expect_err("no artifact");
        assert!(matches!(err, DeckError::Precondition(_)));
    }
}
