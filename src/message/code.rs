//! Mirai code: the linear text form of a message chain
//!
//! Plain runs are literal text; every other segment is a bracketed tag
//! `[mirai:<kind>:<arg>,<arg>,...]`. Inside plain text and tag arguments the
//! characters `\`, `[`, `]` and `,` are escaped with a backslash.
//!
//! Encoding never fails: segments without a mirai-code form are skipped with a
//! warning. Decoding drops tags of unknown kinds but rejects malformed syntax.

use tracing::warn;

use super::segment::{MessageChain, MessageSegment};
use crate::error::{Error, Result};

/// Tag namespace
pub const NAMESPACE: &str = "mirai";

/// `serviceId` of XML rich messages
const SERVICE_XML: i64 = 60;
/// `serviceId` of JSON rich messages
const SERVICE_JSON: i64 = 1;

/// Escape one argument (or a plain run)
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '[' | ']' | ',') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Reverse [`escape`]; also accepts `\:`
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            // A trailing lone backslash is kept literally.
            out.push(chars.next().unwrap_or('\\'));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Encode a chain, dropping its `Source` segment
pub fn encode(chain: &MessageChain) -> String {
    let mut out = String::new();
    for segment in chain {
        match encode_segment(segment) {
            Some(code) => out.push_str(&code),
            None if matches!(segment, MessageSegment::Source { .. }) => {}
            None => warn!(
                kind = segment.kind(),
                "segment has no mirai code form, skipped"
            ),
        }
    }
    out
}

/// Canonical form of one segment, `None` when it has none
pub fn encode_segment(segment: &MessageSegment) -> Option<String> {
    let code = match segment {
        MessageSegment::Plain { text } => escape(text),
        MessageSegment::At { target, display } => {
            tag("at", &[target.to_string(), display.clone()])
        }
        MessageSegment::AtAll => tag("atall", &[]),
        MessageSegment::Face { face_id, name } => {
            let mut args = vec![face_id.to_string()];
            args.extend(name.clone());
            tag("face", &args)
        }
        MessageSegment::Image { image_id, url } => resource_tag("image", image_id, url)?,
        MessageSegment::FlashImage { image_id, url } => resource_tag("flash", image_id, url)?,
        MessageSegment::Voice { voice_id, url } => resource_tag("voice", voice_id, url)?,
        MessageSegment::Xml { xml } => tag("service", &[SERVICE_XML.to_string(), xml.clone()]),
        MessageSegment::Json { json } => {
            tag("service", &[SERVICE_JSON.to_string(), json.clone()])
        }
        MessageSegment::App { content } => tag("app", &[content.clone()]),
        MessageSegment::Poke { name } => tag("poke", &[name.clone()]),
        MessageSegment::Dice { value } => tag("dice", &[value.to_string()]),
        MessageSegment::MusicShare {
            kind,
            title,
            summary,
            jump_url,
            picture_url,
            music_url,
            brief,
        } => tag(
            "musicshare",
            &[
                kind.clone(),
                title.clone(),
                summary.clone(),
                jump_url.clone(),
                picture_url.clone(),
                music_url.clone(),
                brief.clone(),
            ],
        ),
        MessageSegment::File { id, name, size } => {
            tag("file", &[id.clone(), name.clone(), size.to_string()])
        }
        MessageSegment::Source { .. }
        | MessageSegment::Quote { .. }
        | MessageSegment::MarketFace { .. }
        | MessageSegment::Forward { .. }
        | MessageSegment::MiraiCode { .. }
        | MessageSegment::Unsupported { .. } => return None,
    };
    Some(code)
}

fn tag(kind: &str, args: &[String]) -> String {
    if args.is_empty() {
        return format!("[{}:{}]", NAMESPACE, kind);
    }
    let args: Vec<String> = args.iter().map(|arg| escape(arg)).collect();
    format!("[{}:{}:{}]", NAMESPACE, kind, args.join(","))
}

// The id is mandatory; the URL rides along as a second argument when known.
fn resource_tag(kind: &str, id: &Option<String>, url: &Option<String>) -> Option<String> {
    let id = id.as_ref()?;
    let mut args = vec![id.clone()];
    args.extend(url.clone());
    Some(tag(kind, &args))
}

/// Decode mirai code into a chain
pub fn decode(code: &str) -> Result<MessageChain> {
    let mut chain = MessageChain::new();
    let mut text = String::new();
    let mut chars = code.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => text.push(chars.next().unwrap_or('\\')),
            '[' => {
                let body = read_tag_body(&mut chars)?;
                if let Some(segment) = parse_tag(&body)? {
                    flush_text(&mut chain, &mut text);
                    chain.push(segment);
                }
            }
            ']' => {
                return Err(Error::Codec(
                    "unescaped ']' outside of a tag".to_string(),
                ))
            }
            _ => text.push(ch),
        }
    }
    flush_text(&mut chain, &mut text);
    Ok(chain)
}

fn flush_text(chain: &mut MessageChain, text: &mut String) {
    if !text.is_empty() {
        chain.push(MessageSegment::Plain {
            text: std::mem::take(text),
        });
    }
}

// Collects the still-escaped tag body up to the closing bracket.
fn read_tag_body(chars: &mut std::str::Chars<'_>) -> Result<String> {
    let mut body = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                body.push('\\');
                match chars.next() {
                    Some(next) => body.push(next),
                    None => break,
                }
            }
            ']' => return Ok(body),
            '[' => {
                return Err(Error::Codec(format!(
                    "nested '[' inside tag '{}'",
                    body
                )))
            }
            _ => body.push(ch),
        }
    }
    Err(Error::Codec(format!("unterminated tag '[{}'", body)))
}

// Splits on unescaped separators, leaving escapes in place.
fn split_unescaped(input: &str, separator: char, limit: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (index, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if ch == separator && parts.len() + 1 < limit {
            parts.push(&input[start..index]);
            start = index + ch.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_tag(body: &str) -> Result<Option<MessageSegment>> {
    let head = split_unescaped(body, ':', 3);
    if head.len() < 2 || head[0] != NAMESPACE {
        return Err(Error::Codec(format!(
            "tag '[{}]' is not in the '{}' namespace",
            body, NAMESPACE
        )));
    }
    let kind = head[1];
    let args: Vec<String> = match head.get(2) {
        Some(raw) => split_unescaped(raw, ',', usize::MAX)
            .into_iter()
            .map(unescape)
            .collect(),
        None => Vec::new(),
    };
    build_segment(kind, args)
}

fn build_segment(kind: &str, mut args: Vec<String>) -> Result<Option<MessageSegment>> {
    let segment = match kind {
        "at" => {
            expect_args(kind, &args, 1, 2)?;
            MessageSegment::At {
                target: number(kind, &args[0])?,
                display: args.get(1).cloned().unwrap_or_default(),
            }
        }
        "atall" => {
            expect_args(kind, &args, 0, 0)?;
            MessageSegment::AtAll
        }
        "face" => {
            expect_args(kind, &args, 1, 2)?;
            MessageSegment::Face {
                face_id: number(kind, &args[0])?,
                name: args.get(1).cloned(),
            }
        }
        "image" | "flash" | "voice" => {
            expect_args(kind, &args, 1, 2)?;
            let url = args.get(1).cloned();
            let id = Some(args.swap_remove(0));
            match kind {
                "image" => MessageSegment::Image { image_id: id, url },
                "flash" => MessageSegment::FlashImage { image_id: id, url },
                _ => MessageSegment::Voice { voice_id: id, url },
            }
        }
        "service" => {
            expect_args(kind, &args, 2, 2)?;
            let content = args.swap_remove(1);
            match number(kind, &args[0])? {
                SERVICE_XML => MessageSegment::Xml { xml: content },
                SERVICE_JSON => MessageSegment::Json { json: content },
                other => {
                    warn!(service_id = other, "unsupported service message dropped");
                    return Ok(None);
                }
            }
        }
        "app" => {
            expect_args(kind, &args, 1, 1)?;
            MessageSegment::App {
                content: args.swap_remove(0),
            }
        }
        "poke" => {
            // Gateways append type and id; only the name is modelled.
            expect_args(kind, &args, 1, 3)?;
            MessageSegment::Poke {
                name: args.swap_remove(0),
            }
        }
        "dice" => {
            expect_args(kind, &args, 1, 1)?;
            MessageSegment::Dice {
                value: number(kind, &args[0])?,
            }
        }
        "musicshare" => {
            expect_args(kind, &args, 7, 7)?;
            let mut fields = args.into_iter();
            let mut next = || fields.next().unwrap_or_default();
            MessageSegment::MusicShare {
                kind: next(),
                title: next(),
                summary: next(),
                jump_url: next(),
                picture_url: next(),
                music_url: next(),
                brief: next(),
            }
        }
        "file" => {
            expect_args(kind, &args, 3, 3)?;
            MessageSegment::File {
                size: number(kind, &args[2])?,
                name: args.swap_remove(1),
                id: args.swap_remove(0),
            }
        }
        other => {
            warn!(kind = other, "unknown mirai code kind dropped");
            return Ok(None);
        }
    };
    Ok(Some(segment))
}

fn expect_args(kind: &str, args: &[String], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::Codec(format!(
            "'{}' takes {}..={} arguments, got {}",
            kind,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn number(kind: &str, arg: &str) -> Result<i64> {
    arg.trim()
        .parse()
        .map_err(|_| Error::Codec(format!("'{}' expects a number, got '{}'", kind, arg)))
}
