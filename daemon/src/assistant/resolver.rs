/// A launchable application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
}

pub const APPS: &[App] = &[
    App { id: "netflix", name: "Netflix", url: "https://www.netflix.com" },
    App { id: "primevideo", name: "Prime Video", url: "https://www.primevideo.com" },
    App { id: "youtube", name: "YouTube", url: "https://www.youtube.com" },
    App { id: "disney", name: "Disney+", url: "https://www.disneyplus.com" },
    App { id: "hulu", name: "Hulu", url: "https://www.hulu.com" },
    App { id: "spotify", name: "Spotify", url: "https://open.spotify.com" },
    App { id: "twitch", name: "Twitch", url: "https://www.twitch.tv" },
    App { id: "hbomax", name: "HBO Max", url: "https://www.hbomax.com" },
];

/// Spoken keyword to app id. Longer keywords come first so "prime video"
/// wins over "prime".
const KEYWORDS: &[(&str, &str)] = &[
    ("disney plus", "disney"),
    ("prime video", "primevideo"),
    ("hbo max", "hbomax"),
    ("netflix", "netflix"),
    ("youtube", "youtube"),
    ("prime", "primevideo"),
    ("disney", "disney"),
    ("hulu", "hulu"),
    ("spotify", "spotify"),
    ("twitch", "twitch"),
    ("hbo", "hbomax"),
];

const ACTION_VERBS: &[&str] = &["open", "launch", "start"];

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    haystack
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(a, b)| a == b))
}

/// Maps a command like "open netflix" to an app id. Without an action verb
/// nothing matches, so questions that mention an app fall through.
pub fn resolve_app(command: &str) -> Option<&'static str> {
    let words = words(command);
    if !words.iter().any(|w| ACTION_VERBS.contains(&w.as_str())) {
        return None;
    }

    KEYWORDS
        .iter()
        .find(|(keyword, _)| contains_phrase(&words, keyword))
        .map(|(_, id)| *id)
}

pub fn find_app(id: &str) -> Option<&'static App> {
    APPS.iter().find(|app| app.id == id)
}
