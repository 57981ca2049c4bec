//! Message rendering for Telegram delivery.
//!
//! Transforms raw Discord message bodies into the safe HTML subset the
//! Telegram side accepts: mention tokens become readable names, markup
//! characters are escaped, bare URLs and channel references become links.

use fancy_regex::Regex;

use crate::common::error::ResolveError;
use crate::common::types::{ChannelId, RoleId, UserId};

/// Decorative marker prepended to resolved mentions.
const MENTION_MARK: &str = "➤";

/// Horizontal rule framing a notification.
const SEPARATOR: &str = "~~~~~~~~~~~~~~~~~~~~~~";

/// Footer reminding subscribers how to reach the menu.
const SIGNATURE: &str = "| <i>back to /menu</i> |";

/// A user looked up by id.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
    pub username: String,
    pub nickname: Option<String>,
}

impl ResolvedUser {
    /// Guild nickname when set, username otherwise.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

/// A channel looked up by id.
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    pub name: String,
    /// Permanent link to the channel.
    pub url: String,
}

/// Entity lookups needed while rendering a message.
///
/// The production implementation reads the Discord cache; tests substitute
/// fixed tables. A failed lookup is reported and the token stays in place,
/// it never aborts the render.
pub trait EntityResolver: Sync {
    fn resolve_user(&self, id: UserId) -> Result<ResolvedUser, ResolveError>;
    fn resolve_role(&self, id: RoleId) -> Result<String, ResolveError>;
    fn resolve_channel(&self, id: ChannelId) -> Result<ResolvedChannel, ResolveError>;
}

/// Result of rendering a message body.
#[derive(Debug, Clone)]
pub struct Rendered {
    /// The message in Telegram-safe HTML.
    pub text: String,
    /// Any resolution failures encountered along the way.
    pub errors: Vec<ResolveError>,
}

/// Renderer for Discord -> Telegram message translation.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    /// Pattern for user mentions (<@123> or <@!123>).
    user_mention: Regex,
    /// Pattern for role mentions (<@&123>).
    role_mention: Regex,
    /// Pattern for channel mentions after escaping (&lt;#123&gt;).
    channel_mention: Regex,
    /// Pattern for bare http/https URLs, matched in escaped text.
    bare_url: Regex,
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRenderer {
    pub fn new() -> Self {
        Self {
            user_mention: Regex::new(r"<@!?(\d+)>").unwrap(),
            role_mention: Regex::new(r"<@&(\d+)>").unwrap(),
            channel_mention: Regex::new(r"&lt;#(\d+)&gt;").unwrap(),
            bare_url: Regex::new(r#"https?://(?:&amp;|[^\s<>"'&])+"#).unwrap(),
        }
    }

    /// Render a raw message body into Telegram-safe HTML.
    ///
    /// The steps run in a fixed order: user mentions, role mentions,
    /// markup escaping, URL hyperlinking, channel mentions. Escaping runs
    /// after mention resolution (those steps inject tags the escape knows
    /// to skip) and before hyperlinking (anchors must not be re-escaped);
    /// channel tokens are matched in their escaped form. Reordering the
    /// steps changes the output.
    pub fn render(&self, message: &str, resolver: &dyn EntityResolver) -> Rendered {
        let mut errors = Vec::new();

        let step1 = self.resolve_user_mentions(message, resolver, &mut errors);
        let step2 = self.resolve_role_mentions(&step1, resolver, &mut errors);
        let step3 = escape_markup(&step2);
        let step4 = self.hyperlink_bare_urls(&step3);
        let step5 = self.resolve_channel_mentions(&step4, resolver, &mut errors);

        Rendered {
            text: step5,
            errors,
        }
    }

    /// Replace user mention tokens with the member's display name.
    ///
    /// Nickname takes priority over username. Unresolvable tokens are
    /// reported and left as-is.
    fn resolve_user_mentions(
        &self,
        message: &str,
        resolver: &dyn EntityResolver,
        errors: &mut Vec<ResolveError>,
    ) -> String {
        self.user_mention
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                let user_id = match caps[1].parse::<UserId>() {
                    Ok(id) => id,
                    Err(_) => return caps[0].to_string(),
                };
                match resolver.resolve_user(user_id) {
                    Ok(user) => format!("{}<i>{}</i>", MENTION_MARK, user.display_name()),
                    Err(error) => {
                        errors.push(error);
                        caps[0].to_string()
                    }
                }
            })
            .to_string()
    }

    /// Replace role mention tokens with the role name.
    fn resolve_role_mentions(
        &self,
        message: &str,
        resolver: &dyn EntityResolver,
        errors: &mut Vec<ResolveError>,
    ) -> String {
        self.role_mention
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                let role_id = match caps[1].parse::<RoleId>() {
                    Ok(id) => id,
                    Err(_) => return caps[0].to_string(),
                };
                match resolver.resolve_role(role_id) {
                    Ok(name) => format!("{}<i>{}</i>", MENTION_MARK, name),
                    Err(error) => {
                        errors.push(error);
                        caps[0].to_string()
                    }
                }
            })
            .to_string()
    }

    /// Wrap bare URLs in anchor tags.
    ///
    /// Runs after escaping: query ampersands appear as `&amp;` and belong
    /// to the URL, while `&lt;`/`&gt;` mark former delimiters and end it.
    fn hyperlink_bare_urls(&self, message: &str) -> String {
        self.bare_url
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                let url = &caps[0];
                format!("<a href='{}'>{}</a>", url, url)
            })
            .to_string()
    }

    /// Replace escaped channel mention tokens with channel links.
    fn resolve_channel_mentions(
        &self,
        message: &str,
        resolver: &dyn EntityResolver,
        errors: &mut Vec<ResolveError>,
    ) -> String {
        self.channel_mention
            .replace_all(message, |caps: &fancy_regex::Captures| -> String {
                let channel_id = match caps[1].parse::<ChannelId>() {
                    Ok(id) => id,
                    Err(_) => return caps[0].to_string(),
                };
                match resolver.resolve_channel(channel_id) {
                    Ok(channel) => format!(
                        "<a href='{}'>#{}</a>",
                        channel.url,
                        escape_markup(&channel.name)
                    ),
                    Err(error) => {
                        errors.push(error);
                        caps[0].to_string()
                    }
                }
            })
            .to_string()
    }
}

/// Escape `&`, `<` and `>` for the Telegram HTML parser.
///
/// Escaping is selective so the tags this application itself injects pass
/// through: `&` stays when it already starts one of our entities, `<` stays
/// when it opens `<b>`, `<i>`, `<u>`, a closing tag or an anchor, `>` stays
/// when the previous character belongs to one of those tag shapes. Already
/// escaped text passes through unchanged, so the function is idempotent.
pub fn escape_markup(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len() + text.len() / 4);

    for (i, &ch) in chars.iter().enumerate() {
        match ch {
            '&' if !is_entity_start(&chars, i) => result.push_str("&amp;"),
            '<' if !opens_allowed_tag(&chars, i) => result.push_str("&lt;"),
            '>' if !closes_allowed_tag(&chars, i) => result.push_str("&gt;"),
            _ => result.push(ch),
        }
    }

    result
}

fn followed_by(chars: &[char], start: usize, expected: &str) -> bool {
    let mut i = start;
    for expected_ch in expected.chars() {
        match chars.get(i) {
            Some(&c) if c == expected_ch => i += 1,
            _ => return false,
        }
    }
    true
}

/// `&` already beginning one of the entities the escape itself emits.
fn is_entity_start(chars: &[char], i: usize) -> bool {
    followed_by(chars, i + 1, "amp;")
        || followed_by(chars, i + 1, "lt;")
        || followed_by(chars, i + 1, "gt;")
}

/// `<` opening one of the allowed tag shapes.
fn opens_allowed_tag(chars: &[char], i: usize) -> bool {
    followed_by(chars, i + 1, "b>")
        || followed_by(chars, i + 1, "i>")
        || followed_by(chars, i + 1, "u>")
        || matches!(chars.get(i + 1), Some('/' | 'a'))
}

/// `>` terminating one of the allowed tag shapes, including the
/// single-quoted href of an anchor.
fn closes_allowed_tag(chars: &[char], i: usize) -> bool {
    i > 0 && matches!(chars[i - 1], 'b' | 'i' | 'a' | 'u' | '\'')
}

/// Frame a rendered body with the header, rule lines and menu footer.
pub fn compose_notification(header: &str, body: &str) -> String {
    format!(
        "{}\n{}\n\n{}\n{}\n{}",
        SEPARATOR, header, body, SEPARATOR, SIGNATURE
    )
}
