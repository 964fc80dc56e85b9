use crate::extractors::MediaMode;

/// A chat message reduced to what the bot reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` or `/help`
    Help,

    /// A fetch request; `url` is `None` when the command carried no link
    Fetch { mode: &'static str, url: Option<String> },

    /// Anything else, silently ignored
    Ignore,
}

/// Parse the text of an incoming chat message
pub fn parse_command(text: &str) -> Command {
    let text = text.trim();

    let Some(rest) = text.strip_prefix('/') else {
        // Plain messages only count when they carry a link
        return match find_url(text) {
            Some(url) => Command::Fetch {
                mode: MediaMode::Video.as_str(),
                url: Some(url),
            },
            None => Command::Ignore,
        };
    };

    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    // Group chats address commands as `/audio@SomeBot`
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    match name.as_str() {
        "start" | "help" => Command::Help,
        "download" | "video" => Command::Fetch {
            mode: MediaMode::Video.as_str(),
            url: find_url(args),
        },
        "audio" => Command::Fetch {
            mode: MediaMode::Audio.as_str(),
            url: find_url(args),
        },
        _ => Command::Ignore,
    }
}

/// First http(s) link in `text`
pub fn find_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '"' | '\'')))
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(|word| word.trim_end_matches(['.', ',', '!', '?']).to_string())
}

pub const HELP_TEXT: &str = "Send me a link and I will send the media back.\n\n\
/download <link> - video\n\
/audio <link> - audio only\n\
A plain link is treated as /download.";
