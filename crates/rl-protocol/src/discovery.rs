//! Ordered port recognizers for scraping process output
//!
//! Remote servers announce their listening port in free-form log lines whose
//! wording changes between releases. [`PortDiscovery`] keeps those wordings as
//! an ordered table: every time more output arrives the whole buffer is
//! rescanned pattern by pattern, and the first pattern in table order with a
//! valid capture wins, no matter where in the text it matched.
//!
//! New output formats are added by extending [`AGENT_PORT_PATTERNS`], not by
//! touching the scanning code.

use once_cell::sync::Lazy;
use regex::Regex;

/// Recognizers for the agent's startup banner, highest priority first.
///
/// Each pattern's first capture group is the port. The port must be
/// followed by a non-digit so a number split across reads never matches
/// early.
pub const AGENT_PORT_PATTERNS: &[(&str, &str)] = &[
    ("extension-host-agent", r"Extension host agent listening on (\d+)\D"),
    ("accepting-connections", r"Accepting connections at: (?:\S*:)?(\d+)\D"),
    ("server-bound", r"Server bound to (?:\S*:)?(\d+)\D"),
    ("listening-on", r"(?i)listening on (?:\S*:)?(\d+)\D"),
];

static AGENT_TABLE: Lazy<Vec<PortPattern>> = Lazy::new(|| {
    AGENT_PORT_PATTERNS
        .iter()
        .map(|(name, pattern)| PortPattern::new(name, pattern))
        .collect::<Result<_, _>>()
        .expect("built-in agent port patterns are valid")
});

/// Something that can pull a typed value out of accumulated output
pub trait Recognizer {
    /// Value produced on a match
    type Output;

    /// Scan the full buffer; `None` means no match yet
    fn recognize(&self, buffer: &str) -> Option<Self::Output>;

    /// Final scan once the producing process has ended
    ///
    /// The last line may lack its terminator at that point, so one is
    /// supplied before scanning.
    fn recognize_final(&self, buffer: &str) -> Option<Self::Output> {
        self.recognize(buffer)
            .or_else(|| self.recognize(&format!("{}\n", buffer)))
    }
}

/// Parse a decimal capture into a usable port
///
/// Zero, values above 65535 and non-numeric text are not ports.
pub fn parse_port(text: &str) -> Option<u16> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// One named entry in a recognizer table
#[derive(Debug, Clone)]
pub struct PortPattern {
    name: String,
    regex: Regex,
}

impl PortPattern {
    /// Compile a pattern whose first capture group is the port
    pub fn new(name: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    /// Pattern name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First valid port captured anywhere in the buffer
    fn find(&self, buffer: &str) -> Option<u16> {
        self.regex
            .captures_iter(buffer)
            .find_map(|caps| parse_port(caps.get(1)?.as_str()))
    }
}

/// Port found by a [`PortDiscovery`] scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMatch {
    /// Discovered port
    pub port: u16,
    /// Name of the pattern that produced it
    pub pattern: String,
}

/// Ordered multi-pattern port scanner
#[derive(Debug, Clone)]
pub struct PortDiscovery {
    patterns: Vec<PortPattern>,
}

impl PortDiscovery {
    /// Build a scanner from `(name, regex)` pairs in priority order
    pub fn new<'a>(
        patterns: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, regex::Error> {
        let patterns = patterns
            .into_iter()
            .map(|(name, pattern)| PortPattern::new(name, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Scanner for the agent's startup banner
    pub fn agent() -> Self {
        Self {
            patterns: AGENT_TABLE.clone(),
        }
    }

    /// Patterns in priority order
    pub fn patterns(&self) -> &[PortPattern] {
        &self.patterns
    }

    /// Scan accumulated output
    pub fn scan(&self, buffer: &str) -> Option<PortMatch> {
        self.patterns.iter().find_map(|pattern| {
            pattern.find(buffer).map(|port| PortMatch {
                port,
                pattern: pattern.name.clone(),
            })
        })
    }
}

impl Recognizer for PortDiscovery {
    type Output = PortMatch;

    fn recognize(&self, buffer: &str) -> Option<PortMatch> {
        self.scan(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_bounds() {
        assert_eq!(parse_port("1"), Some(1));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("99999"), None);
        assert_eq!(parse_port("port"), None);
    }

    #[test]
    fn test_accepting_connections_banner() {
        let discovery = PortDiscovery::agent();
        let found = discovery
            .scan("** Accepting connections at: 127.0.0.1:39423\n")
            .unwrap();
        assert_eq!(found.port, 39423);
        assert_eq!(found.pattern, "accepting-connections");
    }

    #[test]
    fn test_out_of_range_capture_is_no_match() {
        let discovery = PortDiscovery::agent();
        assert!(discovery.scan("listening on 99999").is_none());
    }

    #[test]
    fn test_extension_host_banner() {
        let discovery = PortDiscovery::agent();
        let output = "*\n* Visual Studio Code Server\n*\nExtension host agent listening on 45123\n";
        assert_eq!(discovery.scan(output).unwrap().port, 45123);
    }

    #[test]
    fn test_ipv6_and_url_forms() {
        let discovery = PortDiscovery::agent();
        assert_eq!(
            discovery.scan("Server bound to [::1]:41000 (IPv6)\n").unwrap().port,
            41000
        );
        assert_eq!(
            discovery
                .scan("Web UI available at http://localhost:8000\nListening on http://127.0.0.1:8001/\n")
                .unwrap()
                .port,
            8001
        );
    }

    #[test]
    fn test_priority_order_beats_text_position() {
        let discovery = PortDiscovery::agent();
        // The generic pattern matches earlier in the text, but the
        // extension-host pattern sits higher in the table.
        let output = "listening on 4000\nExtension host agent listening on 5000\n";
        let found = discovery.scan(output).unwrap();
        assert_eq!(found.port, 5000);
        assert_eq!(found.pattern, "extension-host-agent");
    }

    #[test]
    fn test_invalid_capture_falls_through_to_next_occurrence() {
        let discovery = PortDiscovery::agent();
        let output = "listening on 0\nlistening on 70000\nlistening on 3000\n";
        assert_eq!(discovery.scan(output).unwrap().port, 3000);
    }

    #[test]
    fn test_custom_table_order() {
        let discovery =
            PortDiscovery::new([("second", r"beta=(\d+)"), ("first", r"alpha=(\d+)")]).unwrap();
        let found = discovery.scan("alpha=1111 beta=2222").unwrap();
        assert_eq!(found.port, 2222);
        assert_eq!(discovery.patterns()[0].name(), "second");
    }

    #[test]
    fn test_no_match_yet() {
        let discovery = PortDiscovery::agent();
        assert!(discovery.scan("").is_none());
        assert!(discovery.scan("Starting server...\n").is_none());
    }

    #[test]
    fn test_unterminated_port_waits_for_more_output() {
        let discovery = PortDiscovery::agent();
        assert!(discovery.scan("Extension host agent listening on 394").is_none());
        assert_eq!(
            discovery
                .scan("Extension host agent listening on 39423\n")
                .unwrap()
                .port,
            39423
        );
    }

    #[test]
    fn test_recognize_final_flushes_last_line() {
        let discovery = PortDiscovery::agent();
        assert_eq!(
            discovery.recognize_final("listening on 7000").unwrap().port,
            7000
        );
    }
}
