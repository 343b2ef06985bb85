use std::fmt::Write;

/// Builder for TwiML voice responses.
///
/// Verbs are appended in order and rendered into a single `<Response>`
/// document. All text and attribute values are XML-escaped.
#[derive(Debug, Default, Clone)]
pub struct TwimlBuilder {
    verbs: Vec<String>,
}

/// Settings for a `<Record>` verb.
#[derive(Debug, Clone)]
pub struct RecordOptions<'a> {
    pub action: &'a str,
    pub max_length_secs: u32,
    pub timeout_secs: u32,
}

impl TwimlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(format!(
            r#"<Say voice="Polly.Joanna">{}</Say>"#,
            escape(text)
        ));
        self
    }

    pub fn play(mut self, url: &str) -> Self {
        self.verbs.push(format!("<Play>{}</Play>", escape(url)));
        self
    }

    pub fn pause(mut self, secs: u32) -> Self {
        self.verbs.push(format!(r#"<Pause length="{secs}"/>"#));
        self
    }

    /// Record the caller's next utterance and POST it to `action`.
    ///
    /// `finishOnKey` is cleared so keypad presses don't cut recordings short.
    pub fn record(mut self, opts: &RecordOptions<'_>) -> Self {
        self.verbs.push(format!(
            r#"<Record action="{}" method="POST" maxLength="{}" timeout="{}" playBeep="false" trim="trim-silence" finishOnKey=""/>"#,
            escape(opts.action),
            opts.max_length_secs,
            opts.timeout_secs
        ));
        self
    }

    #[allow(dead_code)]
    pub fn redirect(mut self, url: &str) -> Self {
        self.verbs
            .push(format!(r#"<Redirect method="POST">{}</Redirect>"#, escape(url)));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push("<Hangup/>".to_string());
        self
    }

    pub fn build(self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n");
        for verb in &self.verbs {
            let _ = writeln!(out, "    {verb}");
        }
        out.push_str("</Response>");
        out
    }
}

/// Escape the five XML special characters.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
