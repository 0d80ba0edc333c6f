use chrono::{DateTime, Utc};

use crate::schedule::{effective_end, rrule_frequency, CalendarEvent, Recurrence};

/// UTC timestamp in the iCalendar basic format, e.g. `20260907T100000Z`.
pub fn format_utc_stamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

fn push_prop(out: &mut String, name: &str, value: &str) {
    // Text values are written verbatim; ICS-reserved characters in
    // titles/descriptions are not escaped.
    push_line(out, &format!("{}:{}", name, value));
}

/// Minimal VCALENDAR serialization: one VEVENT per event with UID,
/// SUMMARY, optional DESCRIPTION/LOCATION, DTSTART/DTEND in UTC,
/// STATUS, and an RRULE line for recurring events.
pub fn export_calendar(events: &[CalendarEvent]) -> String {
    let mut out = String::new();
    push_line(&mut out, "BEGIN:VCALENDAR");
    push_line(&mut out, "VERSION:2.0");
    push_line(&mut out, "PRODID:-//homeroomd//Classroom Calendar//EN");
    push_line(&mut out, "CALSCALE:GREGORIAN");

    for ev in events {
        push_line(&mut out, "BEGIN:VEVENT");
        push_prop(&mut out, "UID", &ev.id);
        push_prop(&mut out, "SUMMARY", &ev.title);
        if let Some(desc) = ev.description.as_deref() {
            push_prop(&mut out, "DESCRIPTION", desc);
        }
        if let Some(loc) = ev.location.as_deref() {
            push_prop(&mut out, "LOCATION", loc);
        }
        push_prop(&mut out, "DTSTART", &format_utc_stamp(ev.start_time));
        push_prop(&mut out, "DTEND", &format_utc_stamp(effective_end(ev)));
        push_prop(&mut out, "STATUS", "CONFIRMED");
        if ev.recurrence != Recurrence::None {
            // Custom has no frequency token and falls back to DAILY.
            let freq = rrule_frequency(ev.recurrence).unwrap_or("DAILY");
            push_prop(&mut out, "RRULE", &format!("FREQ={}", freq));
        }
        push_line(&mut out, "END:VEVENT");
    }

    push_line(&mut out, "END:VCALENDAR");
    out
}
