use time::{OffsetDateTime, UtcOffset};

use crate::duration::{format_hours_minutes, format_local_hhmm, to_rfc3339};
use crate::model::{DurationPolicy, Session};

pub fn export_markdown(session: &Session, tz_offset: UtcOffset, now: OffsetDateTime) -> String {
    let date = session.start_time.to_offset(tz_offset).date();
    let start = format_local_hhmm(session.start_time, tz_offset);
    let end = session
        .end_time
        .map(|t| format_local_hhmm(t, tz_offset))
        .unwrap_or_else(|| "…".to_string());

    let mut out = String::new();
    out.push_str(&format!("# {date}\n\n"));
    out.push_str(&format!("## {start}–{end}\n"));
    out.push_str(&format!(
        "Total: {}\n",
        format_hours_minutes(session.total_duration_ms(DurationPolicy::FinalDuration, now))
    ));

    for t in &session.tasks {
        let t_start = format_local_hhmm(t.start_time, tz_offset);
        match t.end_time {
            Some(t_end) => {
                let span = format_hours_minutes(t.elapsed_ms(now));
                out.push_str(&format!(
                    "- {t_start}–{} {} ({span})\n",
                    format_local_hhmm(t_end, tz_offset),
                    t.content
                ));
            }
            None => {
                out.push_str(&format!("- {t_start}–… {} (in progress)\n", t.content));
            }
        }
    }

    out
}

pub fn export_csv(session: &Session) -> String {
    let mut out = String::new();
    out.push_str("session_id,task_id,content,start_ts,end_ts,duration_ms\n");

    for t in &session.tasks {
        let row = [
            csv_escape(&session.id),
            csv_escape(&t.id),
            csv_escape(&t.content),
            csv_escape(&to_rfc3339(t.start_time)),
            t.end_time.map(to_rfc3339).unwrap_or_default(),
            t.duration_ms().map(|ms| ms.to_string()).unwrap_or_default(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

fn csv_escape(s: &str) -> String {
    let needs_quote = s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r');
    if !needs_quote {
        return s.to_string();
    }
    format!("\"{}\"", s.replace('"', "\"\""))
}
