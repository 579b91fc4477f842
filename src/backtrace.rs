//! Capturing and cleaning up stack traces.

use std::borrow::Cow;

use backtrace::Backtrace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::{Frame, Stacktrace};

static HASH_FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^(.*)::h[a-f0-9]{16}$
    "#,
    )
    .unwrap()
});

static CRATE_HASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \b(\[[a-f0-9]{16}\])
    ",
    )
    .unwrap()
});

static CRATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?:_?<)?           # trait impl syntax
        (?:\w+\ as \ )?    # anonymous implementor
        ([a-zA-Z0-9_]+?)   # crate name
        (?:\.\.|::|\[)     # crate delimiter (.. or :: or [)
    ",
    )
    .unwrap()
});

const WELL_KNOWN_NOT_IN_APP: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "tnet_sentry::",
    // these are not modules but things like __rust_maybe_catch_panic
    "__rust_",
    "___rust_",
    "_rust_begin_unwind",
    "rust_begin_unwind",
    "anyhow::",
    "log::",
    "test::",
];

const WELL_KNOWN_BORDER_FRAMES: &[&str] = &[
    "std::panicking::begin_panic",
    "core::panicking::panic",
    "core::result::unwrap_failed",
    "core::option::expect_failed",
];

/// Frames belonging to the capture machinery itself.
const CAPTURE_FRAMES: &[&str] = &["backtrace::", "tnet_sentry::"];

/// Returns the current backtrace as a cleaned up stacktrace.
///
/// Frames of the capture machinery and of the panic runtime are removed and
/// library frames are marked as not in-app.
pub fn current_stacktrace() -> Option<Stacktrace> {
    let mut stacktrace = backtrace_to_stacktrace(&Backtrace::new())?;
    trim_stacktrace(&mut stacktrace);
    mark_in_app(&mut stacktrace);
    if stacktrace.frames.is_empty() {
        None
    } else {
        Some(stacktrace)
    }
}

/// Converts a resolved backtrace into a stacktrace, oldest call first.
pub fn backtrace_to_stacktrace(bt: &Backtrace) -> Option<Stacktrace> {
    let frames = bt
        .frames()
        .iter()
        .flat_map(|frame| {
            // one frame may expand to several symbols because of inlining
            let ip = frame.ip();
            frame.symbols().iter().map(move |sym| {
                let abs_path = sym.filename().map(|m| m.to_string_lossy().to_string());
                let filename = abs_path.as_deref().map(|p| filename(p).to_owned());
                let symbol = sym.name().map(|n| n.to_string());
                let function = symbol.as_deref().map(|s| strip_symbol(s).into_owned());
                Frame {
                    symbol: symbol.filter(|s| Some(s) != function.as_ref()),
                    module: function.as_deref().and_then(parse_crate_name),
                    function,
                    filename,
                    abs_path,
                    lineno: sym.lineno().map(u64::from),
                    instruction_addr: Some(format!("{:p}", ip)),
                    ..Default::default()
                }
            })
        })
        .collect();
    Stacktrace::from_frames_reversed(frames)
}

/// Removes the panic runtime and the capture machinery from the top of a stacktrace.
pub fn trim_stacktrace(stacktrace: &mut Stacktrace) {
    let border = stacktrace
        .frames
        .iter()
        .rev()
        .position(|frame| match frame.function {
            Some(ref func) => is_well_known_border_frame(func),
            None => false,
        });
    if let Some(cutoff) = border {
        let trunc = stacktrace.frames.len() - cutoff - 1;
        stacktrace.frames.truncate(trunc);
    }

    while let Some(frame) = stacktrace.frames.last() {
        let is_capture = match frame.function {
            Some(ref func) => CAPTURE_FRAMES.iter().any(|m| function_starts_with(func, m)),
            None => true,
        };
        if !is_capture {
            break;
        }
        stacktrace.frames.pop();
    }
}

/// Marks frames of well-known libraries as not in-app.
pub fn mark_in_app(stacktrace: &mut Stacktrace) {
    for frame in &mut stacktrace.frames {
        if frame.in_app.is_some() {
            continue;
        }
        if let Some(ref func) = frame.function {
            frame.in_app = Some(!is_well_known_not_in_app(func));
        }
    }
}

fn is_well_known_not_in_app(func: &str) -> bool {
    WELL_KNOWN_NOT_IN_APP
        .iter()
        .any(|m| function_starts_with(func, m))
}

fn is_well_known_border_frame(func: &str) -> bool {
    WELL_KNOWN_BORDER_FRAMES
        .iter()
        .any(|m| function_starts_with(func, m))
}

fn parse_crate_name(func_name: &str) -> Option<String> {
    CRATE_RE
        .captures(func_name)
        .and_then(|caps| caps.get(1))
        .map(|cr| cr.as_str().into())
}

fn filename(s: &str) -> &str {
    s.rsplit(&['/', '\\'][..]).next().unwrap_or(s)
}

fn strip_symbol(s: &str) -> Cow<'_, str> {
    let stripped_trailing_hash = HASH_FUNC_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(s);

    CRATE_HASH_RE.replace_all(stripped_trailing_hash, "")
}

/// Checks whether the function name starts with the given pattern.
///
/// Trait implementations render as `<Type as Trait>` or, in older toolchains,
/// `_<Type..Trait>`; both forms are accepted.
fn function_starts_with(mut func_name: &str, mut pattern: &str) -> bool {
    if pattern.starts_with('<') {
        while pattern.starts_with('<') {
            pattern = &pattern[1..];

            if func_name.starts_with('<') {
                func_name = &func_name[1..];
            } else if func_name.starts_with("_<") {
                func_name = &func_name[2..];
            } else {
                return false;
            }
        }
    } else {
        func_name = func_name.trim_start_matches('<').trim_start_matches("_<");
    }

    if !func_name.is_char_boundary(pattern.len()) {
        return false;
    }

    func_name
        .chars()
        .zip(pattern.chars())
        .all(|(f, p)| f == p || f == '.' && p == ':')
}
