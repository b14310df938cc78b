//! Device/browser identity profiles and header derivation.
//!
//! Keeps a catalog of coherent device identities, rotates between them with
//! weighted randomness, and derives request headers consistent with the
//! active profile.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserFamily {
    fn is_chromium(self) -> bool {
        matches!(self, BrowserFamily::Chrome | BrowserFamily::Edge)
    }

    fn brand(self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "Google Chrome",
            BrowserFamily::Edge => "Microsoft Edge",
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::Safari => "Safari",
        }
    }
}

/// Immutable identity handed out by the store. Many requests may reference
/// the same profile until the next rotation.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub id: String,
    pub device_class: DeviceClass,
    pub os: String,
    pub browser: BrowserFamily,
    pub browser_version: String,
    pub screen: (u16, u16),
    pub viewport: (u16, u16),
    pub user_agent: String,
    pub accept_language: String,
    pub timezone: String,
    pub gpu_vendor: String,
    pub gpu_renderer: String,
}

/// Interaction characteristics regenerated alongside each profile.
#[derive(Debug, Clone, Copy)]
pub struct BehavioralPattern {
    pub scroll_speed: f32,
    pub click_latency: Duration,
    pub typing_wpm: f32,
}

#[derive(Clone)]
struct ProfileTemplate {
    device_class: DeviceClass,
    os: &'static str,
    browser: BrowserFamily,
    base_major: u16,
    // `{ver}` is substituted with the full generated version string.
    user_agent: &'static str,
    platform_hint: &'static str,
    screens: &'static [(u16, u16)],
    accept_languages: &'static [&'static str],
    timezones: &'static [&'static str],
    gpu: &'static [(&'static str, &'static str)],
}

static TEMPLATES: &[ProfileTemplate] = &[
    ProfileTemplate {
        device_class: DeviceClass::Desktop,
        os: "Windows 10",
        browser: BrowserFamily::Chrome,
        base_major: 124,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{ver} Safari/537.36",
        platform_hint: "Windows",
        screens: &[(1920, 1080), (2560, 1440), (1366, 768)],
        accept_languages: &["en-US,en;q=0.9", "en-GB,en;q=0.8", "de-DE,de;q=0.9,en;q=0.7"],
        timezones: &["America/New_York", "Europe/Berlin", "Europe/London"],
        gpu: &[
            ("Google Inc. (NVIDIA)", "ANGLE (NVIDIA GeForce RTX 3060)"),
            ("Google Inc. (AMD)", "ANGLE (AMD Radeon RX 6700 XT)"),
        ],
    },
    ProfileTemplate {
        device_class: DeviceClass::Desktop,
        os: "macOS 14",
        browser: BrowserFamily::Safari,
        base_major: 17,
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{ver} Safari/605.1.15",
        platform_hint: "macOS",
        screens: &[(2560, 1600), (2880, 1800), (1920, 1200)],
        accept_languages: &["en-US,en;q=0.9", "en-AU,en;q=0.8"],
        timezones: &["America/Los_Angeles", "Australia/Sydney"],
        gpu: &[("Apple", "Apple M2"), ("Apple", "Apple M3 Pro")],
    },
    ProfileTemplate {
        device_class: DeviceClass::Desktop,
        os: "Windows 10",
        browser: BrowserFamily::Firefox,
        base_major: 125,
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:{ver}) Gecko/20100101 Firefox/{ver}",
        platform_hint: "Windows",
        screens: &[(1920, 1080), (1680, 1050)],
        accept_languages: &["en-US,en;q=0.8", "fr-FR,fr;q=0.8,en;q=0.6"],
        timezones: &["Europe/Paris", "America/Chicago"],
        gpu: &[("Mozilla", "ANGLE (Intel(R) UHD Graphics 630)")],
    },
    ProfileTemplate {
        device_class: DeviceClass::Mobile,
        os: "Android 14",
        browser: BrowserFamily::Chrome,
        base_major: 124,
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{ver} Mobile Safari/537.36",
        platform_hint: "Android",
        screens: &[(412, 915), (393, 873), (360, 800)],
        accept_languages: &["en-US,en;q=0.9", "es-ES,es;q=0.9,en;q=0.6"],
        timezones: &["America/New_York", "Europe/Madrid", "Asia/Tokyo"],
        gpu: &[("Qualcomm", "Adreno (TM) 740"), ("ARM", "Mali-G715")],
    },
    ProfileTemplate {
        device_class: DeviceClass::Mobile,
        os: "iOS 17",
        browser: BrowserFamily::Safari,
        base_major: 17,
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{ver} Mobile/15E148 Safari/604.1",
        platform_hint: "iOS",
        screens: &[(390, 844), (430, 932), (375, 812)],
        accept_languages: &["en-US,en;q=0.9", "en-GB,en;q=0.9"],
        timezones: &["America/Denver", "Europe/London"],
        gpu: &[("Apple", "Apple A17 GPU")],
    },
    ProfileTemplate {
        device_class: DeviceClass::Tablet,
        os: "iPadOS 17",
        browser: BrowserFamily::Safari,
        base_major: 17,
        user_agent: "Mozilla/5.0 (iPad; CPU OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{ver} Mobile/15E148 Safari/604.1",
        platform_hint: "iOS",
        screens: &[(820, 1180), (1024, 1366)],
        accept_languages: &["en-US,en;q=0.9"],
        timezones: &["America/New_York", "Europe/Amsterdam"],
        gpu: &[("Apple", "Apple M2")],
    },
];

/// Class weights used during rotation; mobile identities draw the least
/// scrutiny so they are favoured.
const CLASS_WEIGHTS: &[(DeviceClass, f32)] = &[
    (DeviceClass::Mobile, 0.5),
    (DeviceClass::Desktop, 0.3),
    (DeviceClass::Tablet, 0.2),
];

/// Upstream pages a plausible visitor might arrive from.
static KNOWN_REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
];

/// Holds the active identity and produces per-request header sets.
pub struct IdentityProfileStore {
    rng: StdRng,
    current: IdentityProfile,
    behavior: BehavioralPattern,
    last_host: Option<String>,
    last_url: Option<Url>,
    rotations: u64,
}

impl IdentityProfileStore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic store for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let current = generate_profile(&mut rng);
        let behavior = generate_behavior(&mut rng);
        Self {
            rng,
            current,
            behavior,
            last_host: None,
            last_url: None,
            rotations: 0,
        }
    }

    pub fn current(&self) -> &IdentityProfile {
        &self.current
    }

    pub fn behavior(&self) -> &BehavioralPattern {
        &self.behavior
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Swap in a freshly generated identity and behavioural pattern.
    pub fn rotate(&mut self) -> IdentityProfile {
        self.current = generate_profile(&mut self.rng);
        self.behavior = generate_behavior(&mut self.rng);
        self.rotations += 1;
        log::info!(
            "rotated identity to {} ({} / {})",
            self.current.id,
            self.current.device_class.as_str(),
            self.current.os
        );
        self.current.clone()
    }

    /// Derive a header set for the target consistent with the active
    /// profile. Tracks the target so the next call can pick a same-site
    /// referer.
    pub fn headers_for(&mut self, target: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, "user-agent", &self.current.user_agent);
        insert(
            &mut headers,
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        );
        insert(&mut headers, "accept-language", &self.current.accept_language);
        insert(&mut headers, "accept-encoding", "gzip, deflate, br");

        let same_site = self
            .last_host
            .as_deref()
            .is_some_and(|host| Some(host) == target.host_str());

        let referer = self.pick_referer(same_site);
        let fetch_site = match (&referer, same_site) {
            (Some(_), true) => "same-origin",
            (Some(_), false) => "cross-site",
            (None, _) => "none",
        };
        if let Some(ref referer) = referer {
            insert(&mut headers, "referer", referer);
        }
        insert(&mut headers, "sec-fetch-site", fetch_site);
        insert(&mut headers, "sec-fetch-mode", "navigate");
        insert(&mut headers, "sec-fetch-dest", "document");
        insert(&mut headers, "sec-fetch-user", "?1");
        insert(&mut headers, "upgrade-insecure-requests", "1");

        if self.current.browser.is_chromium() {
            let major = self
                .current
                .browser_version
                .split('.')
                .next()
                .unwrap_or("124");
            insert(
                &mut headers,
                "sec-ch-ua",
                &format!(
                    "\"Chromium\";v=\"{major}\", \"{}\";v=\"{major}\", \"Not-A.Brand\";v=\"99\"",
                    self.current.browser.brand()
                ),
            );
            let mobile = matches!(self.current.device_class, DeviceClass::Mobile);
            insert(
                &mut headers,
                "sec-ch-ua-mobile",
                if mobile { "?1" } else { "?0" },
            );
            insert(
                &mut headers,
                "sec-ch-ua-platform",
                &format!("\"{}\"", platform_hint(&self.current)),
            );
        }

        self.last_host = target.host_str().map(|host| host.to_string());
        self.last_url = Some(target.clone());
        headers
    }

    fn pick_referer(&mut self, same_site: bool) -> Option<String> {
        if same_site {
            // Continuing a browse session: mostly come from the previous page.
            if self.rng.gen_bool(0.8) {
                return self.last_url.as_ref().map(|url| url.to_string());
            }
        } else if self.rng.gen_bool(0.6) {
            return KNOWN_REFERERS
                .choose(&mut self.rng)
                .map(|referer| referer.to_string());
        }
        None
    }
}

impl Default for IdentityProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

fn platform_hint(profile: &IdentityProfile) -> &'static str {
    TEMPLATES
        .iter()
        .find(|template| template.os == profile.os)
        .map(|template| template.platform_hint)
        .unwrap_or("Windows")
}

fn generate_profile(rng: &mut StdRng) -> IdentityProfile {
    let class = weighted_class(rng);
    let candidates: Vec<&ProfileTemplate> = TEMPLATES
        .iter()
        .filter(|template| template.device_class == class)
        .collect();
    let template = candidates
        .choose(rng)
        .copied()
        .unwrap_or(&TEMPLATES[0]);

    let version = bump_version(rng, template.base_major, template.browser);
    let user_agent = template.user_agent.replace("{ver}", &version);

    let base_screen = template
        .screens
        .choose(rng)
        .copied()
        .unwrap_or((1920, 1080));
    let screen = jitter_screen(rng, base_screen);
    let viewport = (screen.0, screen.1.saturating_sub(viewport_chrome(class)));

    let (gpu_vendor, gpu_renderer) = template
        .gpu
        .choose(rng)
        .copied()
        .unwrap_or(("Google Inc.", "ANGLE (Generic GPU)"));

    IdentityProfile {
        id: format!("profile-{:08x}", rng.r#gen::<u32>()),
        device_class: class,
        os: template.os.to_string(),
        browser: template.browser,
        browser_version: version,
        screen,
        viewport,
        user_agent,
        accept_language: template
            .accept_languages
            .choose(rng)
            .copied()
            .unwrap_or("en-US,en;q=0.9")
            .to_string(),
        timezone: template
            .timezones
            .choose(rng)
            .copied()
            .unwrap_or("UTC")
            .to_string(),
        gpu_vendor: gpu_vendor.to_string(),
        gpu_renderer: gpu_renderer.to_string(),
    }
}

fn weighted_class(rng: &mut StdRng) -> DeviceClass {
    let total: f32 = CLASS_WEIGHTS.iter().map(|(_, weight)| weight).sum();
    let mut target = rng.gen_range(0.0..total);
    for (class, weight) in CLASS_WEIGHTS {
        if target <= *weight {
            return *class;
        }
        target -= weight;
    }
    DeviceClass::Mobile
}

fn bump_version(rng: &mut StdRng, base_major: u16, browser: BrowserFamily) -> String {
    let major = base_major + rng.gen_range(0..=1);
    match browser {
        BrowserFamily::Chrome | BrowserFamily::Edge => format!(
            "{major}.0.{}.{}",
            rng.gen_range(6000..6600),
            rng.gen_range(40..200)
        ),
        BrowserFamily::Firefox => format!("{major}.0"),
        BrowserFamily::Safari => format!("{major}.{}", rng.gen_range(0..=4)),
    }
}

fn jitter_screen(rng: &mut StdRng, (width, height): (u16, u16)) -> (u16, u16) {
    let jitter = |rng: &mut StdRng, value: u16| {
        let delta = rng.gen_range(-8i32..=8);
        (value as i32 + delta).max(320) as u16
    };
    (jitter(rng, width), jitter(rng, height))
}

fn viewport_chrome(class: DeviceClass) -> u16 {
    match class {
        DeviceClass::Desktop => 120,
        DeviceClass::Mobile => 80,
        DeviceClass::Tablet => 90,
    }
}

fn generate_behavior(rng: &mut StdRng) -> BehavioralPattern {
    let click_dist = Normal::new(180.0f32, 40.0).expect("valid normal parameters");
    let typing_dist = Normal::new(42.0f32, 9.0).expect("valid normal parameters");

    let click_ms = click_dist.sample(rng).clamp(80.0, 400.0);
    BehavioralPattern {
        scroll_speed: rng.gen_range(200.0..800.0),
        click_latency: Duration::from_millis(click_ms as u64),
        typing_wpm: typing_dist.sample(rng).clamp(20.0, 90.0),
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_yields_a_fresh_profile_and_behavior() {
        let mut store = IdentityProfileStore::with_seed(7);
        let before = store.current().clone();
        let after = store.rotate();
        assert_ne!(before.id, after.id);
        assert_eq!(store.rotations(), 1);
        let pattern = store.behavior();
        assert!(pattern.typing_wpm >= 20.0 && pattern.typing_wpm <= 90.0);
        assert!(pattern.click_latency >= Duration::from_millis(80));
    }

    #[test]
    fn headers_match_the_active_profile() {
        let mut store = IdentityProfileStore::with_seed(11);
        let url = Url::parse("https://shop.example.com/products").unwrap();
        let headers = store.headers_for(&url);

        let ua = headers.get("user-agent").unwrap().to_str().unwrap();
        assert_eq!(ua, store.current().user_agent);
        assert!(headers.contains_key("accept-language"));
        assert!(headers.contains_key("sec-fetch-site"));

        if store.current().browser.is_chromium() {
            let mobile = headers.get("sec-ch-ua-mobile").unwrap().to_str().unwrap();
            let expected = if store.current().device_class == DeviceClass::Mobile {
                "?1"
            } else {
                "?0"
            };
            assert_eq!(mobile, expected);
        }
    }

    #[test]
    fn same_site_navigation_prefers_previous_page_referer() {
        let mut store = IdentityProfileStore::with_seed(3);
        let first = Url::parse("https://shop.example.com/").unwrap();
        let second = Url::parse("https://shop.example.com/products/42").unwrap();
        store.headers_for(&first);

        let mut same_site_referers = 0;
        for _ in 0..40 {
            let headers = store.headers_for(&second);
            if let Some(referer) = headers.get("referer") {
                if referer.to_str().unwrap().contains("shop.example.com") {
                    same_site_referers += 1;
                }
            }
            // Re-prime the previous-page pointer.
            store.headers_for(&first);
        }
        assert!(same_site_referers > 10);
    }

    #[test]
    fn mobile_class_dominates_rotation_distribution() {
        let mut store = IdentityProfileStore::with_seed(99);
        let mut mobile = 0;
        for _ in 0..200 {
            if store.rotate().device_class == DeviceClass::Mobile {
                mobile += 1;
            }
        }
        // 50% weight; allow generous slack for the seeded draw.
        assert!(mobile > 60, "mobile rotations: {mobile}");
    }
}
