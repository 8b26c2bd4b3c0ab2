use anyhow::Context;
use chrono::{FixedOffset, Local};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "worklog_cli", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17700
    #[arg(long, env = "WORKLOG_CORE_URL", default_value = "http://127.0.0.1:17700")]
    core_url: String,

    /// Owner identity sent as `x-owner-id`.
    #[arg(long, env = "WORKLOG_OWNER")]
    owner: String,

    /// Offset used for day grouping and the review digest.
    ///
    /// Defaults to this machine's local offset.
    #[arg(long, allow_hyphen_values = true)]
    tz_offset_minutes: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a workday, or print the one already running.
    Begin,
    /// Switch to a new task, starting a workday if none is active.
    Task {
        /// What you are working on now.
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
    /// End a workday (the active one unless --session is given).
    End {
        #[arg(long)]
        session: Option<String>,
    },
    /// Show the active workday.
    Current,
    /// List all workdays, newest first.
    List,
    /// Workdays grouped by local date.
    Days,
    /// Ask the core for a review of a workday (the active one by default).
    Review { session: Option<String> },
    /// Print a workday as Markdown or CSV.
    Export {
        session: String,
        #[arg(long, value_enum, default_value_t = ExportFormat::Markdown)]
        format: ExportFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Markdown,
    Csv,
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct TaskView {
    content: String,
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    open: bool,
    duration: String,
}

#[derive(Deserialize, Clone, Debug)]
struct SessionView {
    id: String,
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    active: bool,
    #[serde(default)]
    tasks: Vec<TaskView>,
    total_duration: String,
}

#[derive(Deserialize, Debug)]
struct DayGroup {
    date: String,
    total_duration_ms: i64,
    sessions: Vec<SessionView>,
}

#[derive(Deserialize)]
struct SessionRef {
    session_id: String,
}

#[derive(Deserialize)]
struct TaskStarted {
    session_id: String,
    task_id: String,
}

#[derive(Deserialize)]
struct Review {
    summary: String,
}

#[derive(Serialize)]
struct TaskRequest<'a> {
    content: &'a str,
}

struct CoreClient {
    http: reqwest::Client,
    base_url: String,
    owner: String,
}

impl CoreClient {
    fn new(base_url: &str, owner: &str) -> anyhow::Result<Self> {
        let owner = owner.trim();
        if owner.is_empty() {
            anyhow::bail!("--owner must not be empty");
        }
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_ok_opt<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Option<T>> {
        let res = self
            .http
            .get(self.url(path))
            .header("x-owner-id", &self.owner)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        read_envelope(res).await
    }

    async fn get_ok<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.get_ok_opt(path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing_data"))
    }

    async fn post_ok<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> anyhow::Result<T> {
        let mut req = self.http.post(self.url(path)).header("x-owner-id", &self.owner);
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await.with_context(|| format!("POST {path}"))?;
        read_envelope(res)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing_data"))
    }

    async fn get_text(&self, path: &str) -> anyhow::Result<String> {
        let res = self
            .http
            .get(self.url(path))
            .header("x-owner-id", &self.owner)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(match res.json::<Envelope<()>>().await {
                Ok(body) => anyhow::anyhow!(envelope_error(&body, status)),
                Err(_) => anyhow::anyhow!("http_{}", status.as_u16()),
            });
        }
        Ok(res.text().await?)
    }

    async fn active_session_id(&self) -> anyhow::Result<String> {
        let current: Option<SessionView> = self.get_ok_opt("/sessions/current").await?;
        current
            .map(|s| s.id)
            .ok_or_else(|| anyhow::anyhow!("no active workday; run `begin` or `task` first"))
    }
}

async fn read_envelope<T: DeserializeOwned>(res: reqwest::Response) -> anyhow::Result<Option<T>> {
    let status = res.status();
    let body: Envelope<T> = res
        .json()
        .await
        .map_err(|_| anyhow::anyhow!("http_{}", status.as_u16()))?;
    if !body.ok || !status.is_success() {
        anyhow::bail!(envelope_error(&body, status));
    }
    Ok(body.data)
}

fn envelope_error<T>(body: &Envelope<T>, status: reqwest::StatusCode) -> String {
    body.error
        .clone()
        .unwrap_or_else(|| format!("http_{}", status.as_u16()))
}

fn local_offset_minutes() -> i32 {
    Local::now().offset().local_minus_utc() / 60
}

/// Falls back to the machine's offset when `minutes` is out of range.
fn display_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| *Local::now().offset())
}

fn format_hhmm(rfc3339: &str, offset: FixedOffset) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|t| t.with_timezone(&offset).format("%H:%M").to_string())
        .unwrap_or_else(|_| "??:??".to_string())
}

fn format_hours_minutes(ms: i64) -> String {
    let m = ms.max(0) / 60_000;
    format!("{}h {}m", m / 60, m % 60)
}

fn render_session(s: &SessionView, hhmm: impl Fn(&str) -> String) -> String {
    let end = s.end_time.as_deref().map(&hhmm).unwrap_or_else(|| "now".to_string());
    let state = if s.active { "active" } else { "ended" };
    let mut out = format!(
        "{} {}–{} [{state}] total {}\n",
        s.id,
        hhmm(&s.start_time),
        end,
        s.total_duration
    );
    for t in &s.tasks {
        let t_end = match t.end_time.as_deref() {
            Some(e) => hhmm(e),
            None => "…".to_string(),
        };
        let marker = if t.open { "*" } else { " " };
        out.push_str(&format!(
            "  {marker} {}–{} {} {}\n",
            hhmm(&t.start_time),
            t_end,
            t.duration,
            t.content
        ));
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worklog_cli=warn".into()),
        )
        .init();

    let args = Args::parse();
    let tz = args.tz_offset_minutes.unwrap_or_else(local_offset_minutes);
    let offset = display_offset(tz);
    let hhmm = |t: &str| format_hhmm(t, offset);
    let client = CoreClient::new(&args.core_url, &args.owner)?;
    debug!(core_url = %client.base_url, owner = %client.owner, tz, "worklog_cli");

    match args.command {
        Command::Begin => {
            let started: SessionRef = client.post_ok("/sessions", None::<&()>).await?;
            println!("{}", started.session_id);
        }
        Command::Task { content } => {
            let content = content.join(" ");
            let started: TaskStarted = client
                .post_ok("/tasks", Some(&TaskRequest { content: &content }))
                .await?;
            debug!(task_id = %started.task_id, "task started");
            println!("{} {}", started.session_id, started.task_id);
        }
        Command::End { session } => {
            let id = match session {
                Some(id) => id,
                None => client.active_session_id().await?,
            };
            let ended: SessionRef = client
                .post_ok(&format!("/sessions/{id}/end"), None::<&()>)
                .await?;
            println!("ended {}", ended.session_id);
        }
        Command::Current => {
            match client.get_ok_opt::<SessionView>("/sessions/current").await? {
                Some(s) => print!("{}", render_session(&s, hhmm)),
                None => println!("no active workday"),
            }
        }
        Command::List => {
            let sessions: Vec<SessionView> = client.get_ok("/sessions").await?;
            for s in &sessions {
                print!("{}", render_session(s, hhmm));
            }
        }
        Command::Days => {
            let days: Vec<DayGroup> = client
                .get_ok(&format!("/sessions/days?tz_offset_minutes={tz}"))
                .await?;
            for d in &days {
                println!("{} ({})", d.date, format_hours_minutes(d.total_duration_ms));
                for s in &d.sessions {
                    print!("{}", render_session(s, hhmm));
                }
            }
        }
        Command::Review { session } => {
            let id = match session {
                Some(id) => id,
                None => client.active_session_id().await?,
            };
            let review: Review = client
                .get_ok(&format!("/sessions/{id}/review?tz_offset_minutes={tz}"))
                .await?;
            println!("{}", review.summary);
        }
        Command::Export { session, format } => {
            let path = match format {
                ExportFormat::Markdown => {
                    format!("/sessions/{session}/export/markdown?tz_offset_minutes={tz}")
                }
                ExportFormat::Csv => format!("/sessions/{session}/export/csv"),
            };
            print!("{}", client.get_text(&path).await?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_hhmm(rfc3339: &str) -> String {
        rfc3339[11..16].to_string()
    }

    #[test]
    fn parses_task_words_and_negative_offsets() {
        let args = Args::try_parse_from([
            "worklog_cli",
            "--owner",
            "alice",
            "--tz-offset-minutes",
            "-300",
            "task",
            "write",
            "docs",
        ])
        .unwrap();
        assert_eq!(args.tz_offset_minutes, Some(-300));
        match args.command {
            Command::Task { content } => assert_eq!(content.join(" "), "write docs"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn export_defaults_to_markdown() {
        let args = Args::try_parse_from(["worklog_cli", "--owner", "a", "export", "s1"]).unwrap();
        match args.command {
            Command::Export { session, format } => {
                assert_eq!(session, "s1");
                assert_eq!(format, ExportFormat::Markdown);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn blank_owner_is_rejected() {
        assert!(CoreClient::new("http://127.0.0.1:17700/", "  ").is_err());
        let c = CoreClient::new("http://127.0.0.1:17700/", "alice").unwrap();
        assert_eq!(c.url("/sessions"), "http://127.0.0.1:17700/sessions");
    }

    #[test]
    fn renders_session_with_open_marker() {
        let body = r#"{"ok":true,"data":{
            "id":"s1","start_time":"2024-01-01T09:00:00Z","active":true,
            "total_duration":"01:00:00",
            "tasks":[
              {"content":"design","start_time":"2024-01-01T09:00:00Z",
               "end_time":"2024-01-01T09:30:00Z","open":false,"duration":"00:30:00"},
              {"content":"code","start_time":"2024-01-01T09:30:00Z",
               "open":true,"duration":"00:30:00"}
            ]}}"#;
        let env: Envelope<SessionView> = serde_json::from_str(body).unwrap();
        let s = env.data.unwrap();
        assert_eq!(
            render_session(&s, fixed_hhmm),
            concat!(
                "s1 09:00–now [active] total 01:00:00\n",
                "    09:00–09:30 00:30:00 design\n",
                "  * 09:30–… 00:30:00 code\n",
            )
        );
    }

    #[test]
    fn error_envelope_carries_the_code() {
        let env: Envelope<SessionView> =
            serde_json::from_str(r#"{"ok":false,"error":"already_ended"}"#).unwrap();
        assert_eq!(
            envelope_error(&env, reqwest::StatusCode::CONFLICT),
            "already_ended"
        );
        let env: Envelope<SessionView> = serde_json::from_str(r#"{"ok":false}"#).unwrap();
        assert_eq!(envelope_error(&env, reqwest::StatusCode::BAD_GATEWAY), "http_502");
    }

    #[test]
    fn times_follow_the_requested_offset() {
        let t = "2024-01-01T23:30:00Z";
        assert_eq!(format_hhmm(t, display_offset(0)), "23:30");
        assert_eq!(format_hhmm(t, display_offset(9 * 60)), "08:30");
        assert_eq!(format_hhmm(t, display_offset(-330)), "18:00");
        assert_eq!(format_hhmm("garbage", display_offset(0)), "??:??");
    }

    #[test]
    fn hours_minutes_floor() {
        assert_eq!(format_hours_minutes(8 * 3_600_000 + 59_999), "8h 0m");
        assert_eq!(format_hours_minutes(-5), "0h 0m");
    }
}
