//! Stream address resolution from a detail page.
//!
//! Detail pages embed their playable addresses in inline scripts using a
//! handful of conventions that accumulated over time. The probes below are
//! tried per script block in table order; the best candidate by [`Tier`]
//! wins. No script is executed: this is a textual search and will miss
//! addresses assembled at runtime.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

lazy_static! {
    static ref SCRIPT_SELECTOR: Selector = Selector::parse("script").unwrap();
    static ref HD_SETTER: Regex = Regex::new(r#"\bsetVideoUrlHD\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    static ref HIGH_SETTER: Regex = Regex::new(r#"\bsetVideoUrlHigh\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    static ref LOW_SETTER: Regex = Regex::new(r#"\bsetVideoUrlLow\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    /// `"quality_720p": "<url>"`; group 1 is the height, group 2 the address.
    static ref QUALITY_ENTRY: Regex = Regex::new(r#"["']quality_(\d{3,4})p?["']\s*:\s*["']([^"']+)["']"#).unwrap();
}

/// Quality tier of a resolved address. Ordering is preference: a greater
/// tier replaces a lesser one, equal tiers keep the first match.
///
/// From worst to best: Low, other labels, High, `Labeled(720)`,
/// `Labeled(1080)`, Hd. Only 720p and 1080p labels displace a High address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Low,
    High,
    /// Explicit resolution label, e.g. 1080 for `quality_1080p`.
    Labeled(u32),
    Hd,
}

impl Tier {
    fn rank(self) -> (u8, u32) {
        match self {
            Tier::Low => (0, 0),
            Tier::Labeled(h @ (720 | 1080)) => (3, h),
            Tier::Labeled(h) => (1, h),
            Tier::High => (2, 0),
            Tier::Hd => (4, 0),
        }
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub url: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Always,
    /// Only consulted while nothing has been accepted anywhere so far.
    NothingFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// First match in the block.
    First,
    /// Every match in the block, tier taken from the height label.
    AllLabeled,
}

struct Probe {
    name: &'static str,
    pattern: &'static Regex,
    tier: Tier,
    scan: Scan,
    gate: Gate,
    /// Accepting this probe ends the whole scan.
    stops_scan: bool,
}

/// Probe table in priority order.
fn probes() -> [Probe; 4] {
    [
        Probe { name: "setVideoUrlHD", pattern: &HD_SETTER, tier: Tier::Hd, scan: Scan::First, gate: Gate::Always, stops_scan: true },
        Probe { name: "setVideoUrlHigh", pattern: &HIGH_SETTER, tier: Tier::High, scan: Scan::First, gate: Gate::Always, stops_scan: false },
        Probe { name: "quality entry", pattern: &QUALITY_ENTRY, tier: Tier::Labeled(0), scan: Scan::AllLabeled, gate: Gate::Always, stops_scan: false },
        Probe { name: "setVideoUrlLow", pattern: &LOW_SETTER, tier: Tier::Low, scan: Scan::First, gate: Gate::NothingFound, stops_scan: false },
    ]
}

/// Resolves the best stream address from a detail page.
#[derive(Debug, Clone)]
pub struct StreamResolver {
    cdn_hosts: Vec<String>,
}

impl StreamResolver {
    pub fn new(cdn_hosts: &[String]) -> Self {
        Self { cdn_hosts: cdn_hosts.iter().map(|h| h.to_ascii_lowercase()).collect() }
    }

    /// Accepts `.m3u8` playlists, `.mp4` files and known streaming CDN hosts.
    pub fn looks_like_stream(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.ends_with(".m3u8")
            || lower.contains(".mp4")
            || self.cdn_hosts.iter().any(|h| lower.contains(h.as_str()))
    }

    pub fn resolve(&self, html: &str) -> Option<ResolvedStream> {
        let scripts: Vec<String> = {
            let document = Html::parse_document(html);
            document
                .select(&SCRIPT_SELECTOR)
                .map(|s| s.text().collect::<String>())
                .collect()
        };
        self.resolve_scripts(scripts.iter().map(String::as_str))
    }

    /// Tiered search over script bodies in document order.
    pub fn resolve_scripts<'a>(&self, scripts: impl IntoIterator<Item = &'a str>) -> Option<ResolvedStream> {
        let table = probes();
        let mut best: Option<ResolvedStream> = None;

        'scripts: for script in scripts {
            for probe in &table {
                if probe.gate == Gate::NothingFound && best.is_some() {
                    continue;
                }
                for (tier, url) in self.candidates(probe, script) {
                    debug!("found {} candidate {:?}: {}", probe.name, tier, url);
                    let better = best.as_ref().map_or(true, |b| tier > b.tier);
                    if better {
                        best = Some(ResolvedStream { url, tier });
                        if probe.stops_scan {
                            break 'scripts;
                        }
                    }
                }
            }
        }

        match &best {
            Some(found) => info!("resolved {:?} stream: {}", found.tier, found.url),
            None => warn!("no stream address found in page scripts"),
        }
        best
    }

    /// Valid, unescaped matches of one probe in one script block.
    fn candidates(&self, probe: &Probe, script: &str) -> Vec<(Tier, String)> {
        match probe.scan {
            Scan::First => probe
                .pattern
                .captures(script)
                .map(|c| unescape(&c[1]))
                .filter(|url| self.looks_like_stream(url))
                .map(|url| vec![(probe.tier, url)])
                .unwrap_or_default(),
            Scan::AllLabeled => probe
                .pattern
                .captures_iter(script)
                .filter_map(|c| {
                    let height: u32 = c[1].parse().ok()?;
                    let url = unescape(&c[2]);
                    self.looks_like_stream(&url).then_some((Tier::Labeled(height), url))
                })
                .collect(),
        }
    }
}

fn unescape(raw: &str) -> String {
    raw.replace("\\/", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> StreamResolver {
        StreamResolver::new(&["googlevideo.com".to_string()])
    }

    fn page(scripts: &[&str]) -> String {
        let body: String = scripts.iter().map(|s| format!("<script>{s}</script>")).collect();
        format!("<html><head></head><body>{body}</body></html>")
    }

    #[test]
    fn hd_setter_is_unescaped() {
        let html = page(&[r"html5player.setVideoUrlHD('https:\/\/cdn.example\/hi.m3u8');"]);
        let found = resolver().resolve(&html).unwrap();
        assert_eq!(found.url, "https://cdn.example/hi.m3u8");
        assert_eq!(found.tier, Tier::Hd);
    }

    #[test]
    fn picks_highest_quality_label() {
        let html = page(&[
            r#"var sources = {"quality_720p": "https:\/\/cdn.example\/720.mp4", "quality_1080p": "https:\/\/cdn.example\/1080.mp4", "quality_480p": "https://cdn.example/480.mp4"};"#,
        ]);
        let found = resolver().resolve(&html).unwrap();
        assert_eq!(found.url, "https://cdn.example/1080.mp4");
        assert_eq!(found.tier, Tier::Labeled(1080));
    }

    #[test]
    fn high_keeps_scanning_for_later_hd() {
        let html = page(&[
            "html5player.setVideoUrlHigh('https://cdn.example/high.mp4');",
            "html5player.setVideoUrlHD('https://cdn.example/hd.m3u8');",
        ]);
        assert_eq!(resolver().resolve(&html).unwrap().url, "https://cdn.example/hd.m3u8");
    }

    #[test]
    fn hd_stops_the_scan() {
        let found = resolver()
            .resolve_scripts([
                "setVideoUrlHD('https://cdn.example/hd.m3u8')",
                r#"{"quality_2160p": "https://cdn.example/4k.mp4"}"#,
            ])
            .unwrap();
        assert_eq!(found.tier, Tier::Hd);
    }

    #[test]
    fn labeled_beats_high_and_low_is_last_resort() {
        let found = resolver()
            .resolve_scripts([
                "setVideoUrlHigh('https://cdn.example/high.mp4'); setVideoUrlLow('https://cdn.example/low.mp4');",
                r#"{'quality_720p': 'https://cdn.example/720.mp4'}"#,
            ])
            .unwrap();
        assert_eq!(found.url, "https://cdn.example/720.mp4");

        let low_only = resolver()
            .resolve_scripts(["x.setVideoUrlLow(\"https://cdn.example/low.mp4\")"])
            .unwrap();
        assert_eq!(low_only.tier, Tier::Low);
    }

    #[test]
    fn only_720_and_1080_labels_displace_high() {
        let found = resolver()
            .resolve_scripts([
                "setVideoUrlHigh('https://cdn.example/high.mp4')",
                r#"{"quality_240p": "https://cdn.example/240.mp4", "quality_480p": "https://cdn.example/480.mp4"}"#,
            ])
            .unwrap();
        assert_eq!(found.url, "https://cdn.example/high.mp4");
        assert_eq!(found.tier, Tier::High);

        let labels_only = resolver()
            .resolve_scripts([r#"{"quality_240p": "https://cdn.example/240.mp4", "quality_480p": "https://cdn.example/480.mp4"}"#])
            .unwrap();
        assert_eq!(labels_only.tier, Tier::Labeled(480));
    }

    #[test]
    fn tier_order() {
        assert!(Tier::Low < Tier::Labeled(240));
        assert!(Tier::Labeled(480) < Tier::High);
        assert!(Tier::High < Tier::Labeled(720));
        assert!(Tier::Labeled(720) < Tier::Labeled(1080));
        assert!(Tier::Labeled(1080) < Tier::Hd);
        assert!(Tier::Labeled(2160) < Tier::High);
    }

    #[test]
    fn low_is_ignored_once_anything_was_found() {
        let found = resolver()
            .resolve_scripts([
                "setVideoUrlHigh('https://cdn.example/high.mp4')",
                "setVideoUrlLow('https://cdn.example/low.mp4')",
            ])
            .unwrap();
        assert_eq!(found.tier, Tier::High);
    }

    #[test]
    fn non_stream_matches_are_discarded() {
        let html = page(&[
            "setVideoUrlHD('https://cdn.example/player.js')",
            "setVideoUrlHigh('https://rr3.googlevideo.com/videoplayback?id=1')",
        ]);
        let found = resolver().resolve(&html).unwrap();
        assert_eq!(found.tier, Tier::High);
        assert!(found.url.contains("googlevideo.com"));
    }

    #[test]
    fn stream_predicate() {
        let r = resolver();
        assert!(r.looks_like_stream("https://a/b/master.M3U8"));
        assert!(r.looks_like_stream("https://a/b/file.mp4?token=1"));
        assert!(!r.looks_like_stream("https://a/b/master.m3u8?token=1"));
        assert!(!r.looks_like_stream("https://a/b/thumb.jpg"));
    }

    #[test]
    fn nothing_found_returns_none() {
        assert!(resolver().resolve(&page(&["console.log('hello')"])).is_none());
        assert!(resolver().resolve("<html></html>").is_none());
    }
}
