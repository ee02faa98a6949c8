use std::fmt::Write as _;
use std::time::Duration;

use crate::config::{Configuration, TimeOfDay};

const TITLE: &str = "Pi Picture Frame Control";

/// Choices offered by the settings form.
#[derive(Debug, Clone)]
pub struct SettingsOptions {
    pub hours: Vec<u32>,
    pub minutes: Vec<u32>,
    pub change_minutes: Vec<u64>,
    pub refresh_hours: Vec<u64>,
}

impl Default for SettingsOptions {
    fn default() -> Self {
        Self {
            hours: (0..24).collect(),
            minutes: (0..60).collect(),
            change_minutes: vec![1, 2, 3, 4, 5, 10, 15, 20, 30, 45, 60],
            refresh_hours: vec![1, 2, 3, 4, 5, 0],
        }
    }
}

/// Outcome shown above the settings form after a submission.
#[derive(Debug, Clone)]
pub enum Notice {
    Saved,
    Rejected(Vec<String>),
}

/// Renders every page of the control site. Built once per server.
#[derive(Debug, Clone, Default)]
pub struct Pages {
    options: SettingsOptions,
}

impl Pages {
    pub fn new(options: SettingsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SettingsOptions {
        &self.options
    }

    pub fn index(&self) -> String {
        let body = "<h1>Pi Picture Frame</h1>\
            <p><img class=\"current\" src=\"/current.jpg\" alt=\"Current picture\"></p>\
            <form method=\"post\" action=\"/changepicture.html\">\
            <button type=\"submit\">Next picture</button></form>";
        layout("Home", body)
    }

    pub fn settings(&self, config: &Configuration, notice: Option<&Notice>) -> String {
        let mut body = String::from("<h1>Settings</h1>");
        match notice {
            Some(Notice::Saved) => body.push_str("<p class=\"ok\">Settings saved.</p>"),
            Some(Notice::Rejected(messages)) => {
                body.push_str("<div class=\"error\"><p>Settings were not saved:</p><ul>");
                for message in messages {
                    let _ = write!(body, "<li>{}</li>", escape_html(message));
                }
                body.push_str("</ul></div>");
            }
            None => {}
        }

        body.push_str("<form class=\"settings\" method=\"post\" action=\"/settings.html\">");
        let _ = write!(
            body,
            "<label>Photo directory <input type=\"text\" name=\"photo-directory\" value=\"{}\"></label>",
            escape_html(&config.photo_directory.to_string_lossy())
        );

        let change_minutes = whole_units(config.photo_change_interval, 60);
        let _ = write!(
            body,
            "<label>Change picture every <select name=\"change-minutes\">{}</select> minutes</label>",
            number_options(&self.options.change_minutes, Some(change_minutes), |m| m.to_string())
        );

        let refresh_hours = whole_units(config.photo_refresh_interval, 3600);
        let _ = write!(
            body,
            "<label>Rescan pictures every <select name=\"refresh-hours\">{}</select> hours</label>",
            number_options(&self.options.refresh_hours, Some(refresh_hours), |h| {
                if h == 0 { "Never".to_string() } else { h.to_string() }
            })
        );

        let _ = write!(
            body,
            "<label>Brightness <input type=\"number\" name=\"brightness\" min=\"0\" max=\"100\" value=\"{}\"></label>",
            config.brightness
        );

        body.push_str(&self.time_fields("Wake screen at", "awake", config.awake_time));
        body.push_str(&self.time_fields("Sleep screen at", "sleep", config.sleep_time));
        body.push_str("<div class=\"form-actions\"><button type=\"submit\">Save</button></div></form>");
        layout("Settings", &body)
    }

    fn time_fields(&self, label: &str, prefix: &str, current: Option<TimeOfDay>) -> String {
        let hours = optional_options(&self.options.hours, current.map(|t| t.hour()));
        let minutes = optional_options(&self.options.minutes, current.map(|t| t.minute()));
        format!(
            "<label>{label} <select name=\"{prefix}-hour\">{hours}</select> : \
             <select name=\"{prefix}-minute\">{minutes}</select></label>"
        )
    }

    /// Screen power page, also used to refuse control actions sent with the wrong method.
    pub fn turn_off(&self, message: &str, screen_on: bool) -> String {
        let action = if screen_on { "Off" } else { "On" };
        let body = format!(
            "<h1>Power</h1><p class=\"notice\">{}</p>\
             <form method=\"post\" action=\"/sleep.html\"><button type=\"submit\">Turn Screen {action}</button></form>\
             <form method=\"post\" action=\"/restart.html\"><button type=\"submit\">Restart</button></form>\
             <form method=\"post\" action=\"/shutdown.html\"><button class=\"danger\" type=\"submit\">Shut Down</button></form>\
             <form method=\"post\" action=\"/linux.html\"><button type=\"submit\">Exit to Desktop</button></form>",
            escape_html(message)
        );
        layout("Power", &body)
    }

    pub fn about(&self) -> String {
        let body = format!(
            "<h1>About</h1><p>Pi Picture Frame version {}.</p>\
             <p>Licensed under {}.</p>\
             <p><a href=\"/full.html\">Show the current picture full screen</a></p>",
            env!("CARGO_PKG_VERSION"),
            escape_html(env!("CARGO_PKG_LICENSE")),
        );
        layout("About", &body)
    }

    /// Current picture filling the browser window, reloaded every minute.
    pub fn full(&self) -> String {
        format!(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
             <meta http-equiv=\"refresh\" content=\"60\"><title>{TITLE}</title>\
             <style>html, body {{ margin: 0; height: 100%; background: #000; }}\
             img {{ width: 100%; height: 100%; object-fit: contain; }}</style></head>\
             <body><a href=\"/\"><img src=\"/current.jpg\" alt=\"Current picture\"></a></body></html>"
        )
    }

    pub fn shutdown(&self, message: &str) -> String {
        layout(
            "Goodbye",
            &format!("<h1>Goodbye</h1><p class=\"notice\">{}</p>", escape_html(message)),
        )
    }
}

pub fn not_found() -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{TITLE}. Not Found.</title></head><body><h1>404 Not Found</h1></body></html>"
    )
}

pub fn error_page(error: &anyhow::Error) -> String {
    let mut body = String::from("<h1>500: Internal System Error</h1><h2>Error:</h2>");
    for cause in error.chain() {
        for line in cause.to_string().lines() {
            let _ = write!(body, "<p>{}</p>", escape_html(line));
        }
    }
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>{TITLE}</title></head>\
         <body>{body}</body></html>"
    )
}

/// `duration` in whole `unit_secs`, rounded up so a non-zero duration never shows as zero.
fn whole_units(duration: Duration, unit_secs: u64) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.div_ceil(unit_secs)
}

fn number_options(values: &[u64], selected: Option<u64>, label: impl Fn(u64) -> String) -> String {
    let mut out = String::new();
    let mut matched = false;
    for &value in values {
        let is_selected = selected == Some(value);
        matched |= is_selected;
        let _ = write!(
            out,
            "<option value=\"{value}\"{}>{}</option>",
            if is_selected { " selected" } else { "" },
            label(value)
        );
    }
    // Keep hand-edited values selectable so saving the form does not change them.
    if let Some(value) = selected.filter(|_| !matched) {
        let _ = write!(out, "<option value=\"{value}\" selected>{}</option>", label(value));
    }
    out
}

fn optional_options(values: &[u32], selected: Option<u32>) -> String {
    let mut out = format!(
        "<option value=\"\"{}>--</option>",
        if selected.is_none() { " selected" } else { "" }
    );
    for &value in values {
        let _ = write!(
            out,
            "<option value=\"{value}\"{}>{value:02}</option>",
            if selected == Some(value) { " selected" } else { "" }
        );
    }
    out
}

fn layout(heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{TITLE}: {heading}</title>\
         <link rel=\"stylesheet\" href=\"/css/pure/pure-min.css\"><style>{}</style></head>\
         <body><nav><a href=\"/\">Home</a> <a href=\"/settings.html\">Settings</a> \
         <a href=\"/turnoff.html\">Power</a> <a href=\"/about.html\">About</a></nav><main>{body}</main></body></html>",
        styles()
    )
}

fn styles() -> &'static str {
    "body { font-family: sans-serif; margin: 0; background: #f5f5f5; color: #222; }\n\
     nav { background: #263238; padding: 12px 24px; }\n\
     nav a { color: #fff; margin-right: 16px; text-decoration: none; }\n\
     main { max-width: 960px; margin: 0 auto; padding: 24px; background: #fff; min-height: 100vh; box-sizing: border-box; }\n\
     img.current { max-width: 100%; border-radius: 4px; }\n\
     form { display: inline-block; margin: 4px; }\n\
     form.settings { display: block; }\n\
     form.settings label { display: block; margin: 12px 0; }\n\
     button { padding: 6px 12px; border-radius: 4px; border: 1px solid #1976d2; background: #2196f3; color: #fff; cursor: pointer; }\n\
     button.danger { border-color: #b71c1c; background: #d32f2f; }\n\
     .ok { background: #e8f5e9; color: #1b5e20; padding: 12px; border-radius: 4px; }\n\
     .error { background: #ffebee; color: #b71c1c; padding: 12px; border-radius: 4px; }\n\
     .notice { font-size: 1.1rem; }"
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn settings_marks_current_values() {
        let pages = Pages::default();
        let config = Configuration {
            photo_change_interval: Duration::from_secs(15 * 60),
            awake_time: TimeOfDay::new(7, 5),
            ..Configuration::default()
        };
        let html = pages.settings(&config, None);
        assert!(html.contains("<option value=\"15\" selected>15</option>"));
        assert!(html.contains("<option value=\"7\" selected>07</option>"));
        assert!(html.contains("<option value=\"5\" selected>05</option>"));
        assert!(html.contains("<select name=\"sleep-hour\"><option value=\"\" selected>--</option>"));
    }

    #[test]
    fn unusual_interval_stays_selectable() {
        let pages = Pages::default();
        let config = Configuration {
            photo_change_interval: Duration::from_secs(7 * 60),
            ..Configuration::default()
        };
        let html = pages.settings(&config, None);
        assert!(html.contains("<option value=\"7\" selected>7</option>"));
    }

    #[test]
    fn sub_unit_intervals_never_show_as_zero() {
        let pages = Pages::default();
        let config = Configuration {
            photo_change_interval: Duration::from_secs(30),
            photo_refresh_interval: Duration::from_secs(90 * 60),
            ..Configuration::default()
        };
        let html = pages.settings(&config, None);
        assert!(html.contains("<option value=\"1\" selected>1</option>"));
        assert!(html.contains("<option value=\"2\" selected>2</option>"));
        assert!(!html.contains("value=\"0\" selected"));
    }

    #[test]
    fn whole_units_round_up() {
        assert_eq!(whole_units(Duration::ZERO, 60), 0);
        assert_eq!(whole_units(Duration::from_millis(500), 60), 1);
        assert_eq!(whole_units(Duration::from_secs(90), 60), 2);
        assert_eq!(whole_units(Duration::from_secs(3 * 3600), 3600), 3);
    }

    #[test]
    fn about_shows_the_version() {
        let html = Pages::default().about();
        assert!(html.contains(env!("CARGO_PKG_VERSION")));
        assert!(html.contains("/full.html"));
    }

    #[test]
    fn rejected_notice_escapes_messages() {
        let pages = Pages::default();
        let notice = Notice::Rejected(vec!["photo-directory: <empty>".into()]);
        let html = pages.settings(&Configuration::default(), Some(&notice));
        assert!(html.contains("photo-directory: &lt;empty&gt;"));
    }

    #[test]
    fn turn_off_offers_the_opposite_state() {
        let pages = Pages::default();
        assert!(pages.turn_off("hi", true).contains("Turn Screen Off"));
        assert!(pages.turn_off("hi", false).contains("Turn Screen On"));
    }

    #[test]
    fn error_page_lists_the_cause_chain() {
        let err = anyhow!("disk gone").context("failed to read picture");
        let html = error_page(&err);
        assert!(html.contains("500: Internal System Error"));
        assert!(html.contains("<p>failed to read picture</p>"));
        assert!(html.contains("<p>disk gone</p>"));
    }
}
