use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use mflux_contracts::runs::documents::{read_document, write_document};
use mflux_contracts::{CommanderError, CommanderResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_PREFIX: &str = "mflux_output_";
pub const SESSION_MARKER_FILE: &str = "session.json";
pub const RUN_PREFIX: &str = "run_";
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_COLLISIONS: u32 = 100;
const MAX_RUN_ALLOCATION_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionMarker {
    session_id: String,
    created_at: String,
    last_activity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub dir: PathBuf,
    pub name: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// False when this invocation created the directory.
    pub reused: bool,
}

impl Session {
    pub fn run_dir(&self, run_id: u32) -> PathBuf {
        self.dir.join(run_dir_name(run_id))
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join("index.html")
    }
}

/// Owns the session directories under one output root.
#[derive(Debug, Clone)]
pub struct SessionManager {
    output_root: PathBuf,
    expiry: Duration,
}

impl SessionManager {
    pub fn new(output_root: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            output_root: output_root.into(),
            expiry,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn resolve_session(&self, force_new: bool) -> CommanderResult<Session> {
        self.resolve_session_at(force_new, Utc::now())
    }

    /// Most recently active session if still fresh at `now`, otherwise a new one.
    pub fn resolve_session_at(
        &self,
        force_new: bool,
        now: DateTime<Utc>,
    ) -> CommanderResult<Session> {
        if !force_new {
            if let Some(mut session) = self.latest() {
                if self.is_fresh(&session, now) {
                    session.reused = true;
                    return Ok(session);
                }
            }
        }
        self.create_session(now)
    }

    /// Activity stamped in the future (clock skew) counts as age zero.
    pub fn is_fresh(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let age = now
            .signed_duration_since(session.last_activity)
            .max(Duration::zero());
        age < self.expiry
    }

    /// Newest session by last activity; equal activity falls back to the
    /// greatest name stamp, then the highest collision suffix.
    pub fn latest(&self) -> Option<Session> {
        self.discover().pop()
    }

    /// All sessions under the root, oldest activity first.
    pub fn discover(&self) -> Vec<Session> {
        let Ok(entries) = std::fs::read_dir(&self.output_root) else {
            return Vec::new();
        };
        let mut sessions = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                load_session(&entry.path(), &name)
            })
            .collect::<Vec<Session>>();
        sessions.sort_by(|a, b| {
            a.last_activity
                .cmp(&b.last_activity)
                .then_with(|| name_order(&a.name).cmp(&name_order(&b.name)))
        });
        sessions
    }

    /// Opens an existing session directory, e.g. one named on the command line.
    pub fn open(&self, dir: &Path) -> CommanderResult<Session> {
        let name = dir
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        let mut session = load_session(dir, &name).ok_or_else(|| {
            CommanderError::directory(dir, "not a session directory (expected mflux_output_<timestamp>)")
        })?;
        session.reused = true;
        Ok(session)
    }

    /// Records activity at `now`; the stored value never moves backwards.
    pub fn touch(&self, session: &mut Session, now: DateTime<Utc>) -> CommanderResult<()> {
        let marker_path = session.dir.join(SESSION_MARKER_FILE);
        let on_disk = read_marker(&marker_path).and_then(|marker| parse_ts(&marker.last_activity));
        let mut latest = session.last_activity.max(now);
        if let Some(previous) = on_disk {
            latest = latest.max(previous);
        }
        session.last_activity = latest;
        write_marker(session)
    }

    pub fn allocate_run(&self, session: &mut Session) -> CommanderResult<u32> {
        self.allocate_run_at(session, Utc::now())
    }

    /// Reserves `max(existing run ids) + 1` by creating its directory.
    ///
    /// Creation is exclusive: a directory claimed concurrently by another
    /// invocation moves allocation on to the next id.
    pub fn allocate_run_at(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> CommanderResult<u32> {
        let mut candidate = match list_run_ids(&session.dir).into_iter().max() {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| CommanderError::directory(&session.dir, "run ids exhausted"))?,
            None => 1,
        };
        for _ in 0..MAX_RUN_ALLOCATION_ATTEMPTS {
            let run_dir = session.run_dir(candidate);
            match std::fs::create_dir(&run_dir) {
                Ok(()) => {
                    self.touch(session, now)?;
                    return Ok(candidate);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    candidate = candidate.checked_add(1).ok_or_else(|| {
                        CommanderError::directory(&session.dir, "run ids exhausted")
                    })?;
                }
                Err(err) => {
                    return Err(CommanderError::directory_io(
                        run_dir,
                        "cannot create run directory",
                        err,
                    ))
                }
            }
        }
        Err(CommanderError::directory(
            &session.dir,
            format!("run id allocation kept colliding after {MAX_RUN_ALLOCATION_ATTEMPTS} attempts"),
        ))
    }

    fn create_session(&self, now: DateTime<Utc>) -> CommanderResult<Session> {
        std::fs::create_dir_all(&self.output_root).map_err(|err| {
            CommanderError::directory_io(&self.output_root, "cannot create output root", err)
        })?;

        let base_name = session_name(now);
        for attempt in 0..MAX_NAME_COLLISIONS {
            let name = if attempt == 0 {
                base_name.clone()
            } else {
                format!("{base_name}-{attempt}")
            };
            let dir = self.output_root.join(&name);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    let session = Session {
                        dir: dir.clone(),
                        name,
                        session_id: Uuid::new_v4().to_string(),
                        created_at: now,
                        last_activity: now,
                        reused: false,
                    };
                    if let Err(err) = write_marker(&session) {
                        let _ = std::fs::remove_dir_all(&dir);
                        return Err(err);
                    }
                    return Ok(session);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(CommanderError::directory_io(
                        dir,
                        "cannot create session directory",
                        err,
                    ))
                }
            }
        }
        Err(CommanderError::directory(
            &self.output_root,
            format!("too many sessions named {base_name}"),
        ))
    }
}

pub fn run_dir_name(run_id: u32) -> String {
    format!("{RUN_PREFIX}{run_id}")
}

pub fn parse_run_dir_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(RUN_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()
}

/// Run ids present in `session_dir`, ascending.
pub fn list_run_ids(session_dir: &Path) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir(session_dir) else {
        return Vec::new();
    };
    let mut ids = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| parse_run_dir_name(entry.file_name().to_str()?))
        .collect::<Vec<u32>>();
    ids.sort_unstable();
    ids
}

/// Directory name for a session created at `now`, stamped in local time.
pub fn session_name(now: DateTime<Utc>) -> String {
    format!(
        "{SESSION_PREFIX}{}",
        now.with_timezone(&Local).format(NAME_TIMESTAMP_FORMAT)
    )
}

/// Creation time encoded in a session directory name (`-N` suffixes allowed).
pub fn parse_session_name(name: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(SESSION_PREFIX)?;
    let stamp = match rest.split_once('-') {
        Some((stamp, suffix)) if suffix.chars().all(|ch| ch.is_ascii_digit()) => stamp,
        Some(_) => return None,
        None => rest,
    };
    let naive = NaiveDateTime::parse_from_str(stamp, NAME_TIMESTAMP_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

fn name_order(name: &str) -> (&str, u32) {
    match name.rsplit_once('-') {
        Some((stamp, suffix)) => (stamp, suffix.parse::<u32>().unwrap_or(0)),
        None => (name, 0),
    }
}

fn load_session(dir: &Path, name: &str) -> Option<Session> {
    let named_at = parse_session_name(name)?;
    let marker = read_marker(&dir.join(SESSION_MARKER_FILE));
    let created_at = marker
        .as_ref()
        .and_then(|marker| parse_ts(&marker.created_at))
        .unwrap_or(named_at);
    let last_activity = marker
        .as_ref()
        .and_then(|marker| parse_ts(&marker.last_activity))
        .unwrap_or(named_at);
    let session_id = marker
        .map(|marker| marker.session_id)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| name.to_string());
    Some(Session {
        dir: dir.to_path_buf(),
        name: name.to_string(),
        session_id,
        created_at,
        last_activity,
        reused: true,
    })
}

fn read_marker(path: &Path) -> Option<SessionMarker> {
    if !path.exists() {
        return None;
    }
    match read_document::<SessionMarker>(path) {
        Ok(marker) => Some(marker),
        Err(err) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable session marker: {err:#}");
            None
        }
    }
}

fn write_marker(session: &Session) -> CommanderResult<()> {
    let marker = SessionMarker {
        session_id: session.session_id.clone(),
        created_at: format_ts(session.created_at),
        last_activity: format_ts(session.last_activity),
    };
    let path = session.dir.join(SESSION_MARKER_FILE);
    write_document(&path, &marker)
        .map_err(|err| CommanderError::directory(&path, format!("cannot write session marker: {err:#}")))
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
