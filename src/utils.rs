//! Utility functions for filenames, extensions and disk space

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Characters that are not allowed in folder names on common filesystems
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of the title part of an episode filename
pub const MAX_SLUG_LEN: usize = 150;

#[allow(clippy::expect_used)]
static DASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex is valid"));

/// Turn a podcast title into a folder name that is safe on every platform
///
/// Forbidden characters become `-`, runs of dashes and whitespace collapse to a
/// single `-`, and leading/trailing dots, dashes and spaces are stripped. An
/// empty result becomes `"unnamed"`.
///
/// ```
/// use podkeep::utils::sanitize_folder_name;
///
/// assert_eq!(sanitize_folder_name("Tech: Talk / Weekly"), "Tech-Talk-Weekly");
/// assert_eq!(sanitize_folder_name("..."), "unnamed");
/// ```
pub fn sanitize_folder_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();

    let collapsed = DASH_RUNS.replace_all(replaced.trim(), "-");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == '-' || c.is_whitespace());

    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercase ASCII slug of a title, at most `max_len` characters
///
/// ```
/// use podkeep::utils::slugify;
///
/// assert_eq!(slugify("Episode 12: The Return!", 150), "episode-12-the-return");
/// ```
pub fn slugify(title: &str, max_len: usize) -> String {
    let lower = title.to_lowercase();
    let slug = NON_SLUG.replace_all(&lower, "-");
    let mut slug = slug.trim_matches('-').to_string();

    if slug.len() > max_len {
        slug.truncate(max_len);
        // Avoid a dangling separator after truncation
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        "episode".to_string()
    } else {
        slug
    }
}

/// Infer the audio file extension from the URL path, then the content type
///
/// Falls back to `mp3`, the overwhelmingly common podcast enclosure type.
pub fn infer_extension(audio_url: &str, content_type: Option<&str>) -> String {
    if let Some(ext) = extension_from_url(audio_url) {
        return ext;
    }

    content_type
        .and_then(extension_from_mime)
        .unwrap_or("mp3")
        .to_string()
}

fn extension_from_url(audio_url: &str) -> Option<String> {
    let parsed = url::Url::parse(audio_url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last_segment).ok()?;
    let ext = Path::new(decoded.as_ref()).extension()?.to_str()?;

    let ext = ext.to_ascii_lowercase();
    let is_plausible = !ext.is_empty()
        && ext.len() <= 5
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    is_plausible.then_some(ext)
}

fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/webm" => Some("webm"),
        "audio/flac" => Some("flac"),
        _ => None,
    }
}

/// Format a byte count for logs ("1.5 GB")
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Get available disk space for a given path
///
/// Returns the number of bytes available to unprivileged users on the filesystem
/// containing `path`. The path must exist.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or the platform query fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string, stat is zeroed before
        // the call, and the struct is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail: blocks available to unprivileged users; f_frsize: fragment size
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0)) // null terminator
            .collect();

        // SAFETY: wide_path is null-terminated and every output pointer refers to
        // a live, aligned u64 that is only read after the call succeeds.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
