//! Client-facing demo directory: `demolist`, `demoget` and download checks
//!
//! Replies are game commands queued for the requesting client. A listing
//! longer than one command line is split between entries, never inside one.

use crate::commands::atoi;
use crate::config::DemoConfig;
use crate::error::DemoResult;
use crate::filename::{file_extension, starts_with_ignore_case};
use crate::retention::list_demos;

/// Entries shown per `demolist` window
pub const DEMOS_PER_VIEW: usize = 30;
/// Longest game command the client accepts
pub const MAX_STRING_CHARS: usize = 1024;

const LIST_HEADER: &str = "pr \"Available demos:\n----------------\n";
const LIST_USAGE: &str = "pr \"Usage: demolist [starting position]\n\"";
// room kept for the closing quote and terminator
const LINE_SLACK: usize = 1 + 5;

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Builds the `demolist` replies for the current map's demo folder
///
/// `start` is the raw 1-based argument. Without it the last page is shown.
pub fn demo_list(config: &DemoConfig, mapname: &str, start: Option<&str>) -> DemoResult<Vec<String>> {
    let start = match start {
        Some(arg) => match usize::try_from(atoi(arg) - 1) {
            Ok(start) => Some(start),
            Err(_) => return Ok(vec![LIST_USAGE.to_string()]),
        },
        None => None,
    };

    let folder = config.resolve(&config.map_dir(mapname));
    let demos = list_demos(&folder, &config.demo_extension)?;
    let ext_len = config.demo_extension.len();

    let mut replies = Vec::new();
    let mut message = String::from(LIST_HEADER);

    if demos.is_empty() {
        message.push_str("none\n");
    } else {
        let count = demos.len();
        let start = match start {
            None => count.saturating_sub(DEMOS_PER_VIEW),
            Some(start) => start.min(count - 1),
        };
        let end = (start + DEMOS_PER_VIEW).min(count);

        if start > 0 {
            message.push_str("...\n");
        }

        for (i, name) in demos.iter().enumerate().take(end).skip(start) {
            let entry = escape_quotes(&name[..name.len() - ext_len]);
            let number = format!("{}: ", i + 1);

            if message.len() + number.len() + entry.len() + 1 + LINE_SLACK >= MAX_STRING_CHARS {
                message.push('"');
                replies.push(std::mem::replace(&mut message, String::from("pr \"")));

                if "demoget ".len() + number.len() + entry.len() + 1 + LINE_SLACK >= MAX_STRING_CHARS {
                    continue;
                }
            }

            message.push_str(&number);
            message.push_str(&entry);
            message.push('\n');
        }

        if end < count {
            message.push_str("...\n");
        }
    }

    message.push('"');
    replies.push(message);
    Ok(replies)
}

/// Resolves a `demoget` selector to a quoted path, or a bare `demoget`
///
/// The selector is a 1-based index, or a run of dots counting back from the
/// newest demo. Out of range indices are clamped.
pub fn demo_get(config: &DemoConfig, mapname: &str, selector: &str) -> DemoResult<String> {
    let folder = config.map_dir(mapname);
    let demos = list_demos(&config.resolve(&folder), &config.demo_extension)?;

    if demos.is_empty() {
        return Ok("demoget".to_string());
    }

    let last = demos.len() as i64 - 1;
    let index = if selector.starts_with('.') {
        demos.len() as i64 - selector.len() as i64
    } else {
        atoi(selector) - 1
    };
    let name = &demos[index.clamp(0, last) as usize];

    let reply = format!("demoget \"{}/{}\"", folder, escape_quotes(name));
    if reply.len() + 5 >= MAX_STRING_CHARS {
        return Ok("demoget".to_string());
    }
    Ok(reply)
}

/// True if a download request names a demo below the demo root
pub fn is_download_request(config: &DemoConfig, request: &str) -> bool {
    let root = config.demo_dir();
    let ext = &config.demo_extension;

    if request.len() <= root.len() + 1 + ext.len() {
        return false;
    }
    if !starts_with_ignore_case(request, &root) || request.as_bytes()[root.len()] != b'/' {
        return false;
    }

    file_extension(request).is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_with_demos(names: &[String]) -> (tempfile::TempDir, DemoConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = DemoConfig::new(dir.path(), 8);
        let folder = config.resolve(&config.map_dir("wdm1"));
        fs::create_dir_all(&folder).unwrap();
        for name in names {
            fs::write(folder.join(name), b"demo").unwrap();
        }
        (dir, config)
    }

    fn numbered(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("race{:03}.wdz20", i)).collect()
    }

    #[test]
    fn test_list_empty_folder() {
        let (_dir, config) = config_with_demos(&[]);
        let replies = demo_list(&config, "wdm1", None).unwrap();
        assert_eq!(replies, vec!["pr \"Available demos:\n----------------\nnone\n\""]);
    }

    #[test]
    fn test_list_small_folder() {
        let (_dir, config) = config_with_demos(&["a.wdz20".to_string(), "b\"q.wdz20".to_string()]);
        let replies = demo_list(&config, "wdm1", None).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0],
            "pr \"Available demos:\n----------------\n1: a\n2: b\\\"q\n\""
        );
    }

    #[test]
    fn test_list_defaults_to_last_page() {
        let (_dir, config) = config_with_demos(&numbered(45));
        let replies = demo_list(&config, "wdm1", None).unwrap();
        let text = replies.concat();

        assert!(text.contains("...\n16: race015\n"));
        assert!(text.contains("45: race044\n"));
        assert!(!text.contains("15: race014"));
        assert!(!text.ends_with("...\n\""));
    }

    #[test]
    fn test_list_from_start_marks_more() {
        let (_dir, config) = config_with_demos(&numbered(45));
        let replies = demo_list(&config, "wdm1", Some("1")).unwrap();
        let text = replies.concat();

        assert!(text.starts_with("pr \"Available demos:\n----------------\n1: race000\n"));
        assert!(text.contains("30: race029\n...\n\""));
        assert!(!text.contains("31: race030"));
    }

    #[test]
    fn test_list_start_past_end_clamps() {
        let (_dir, config) = config_with_demos(&numbered(3));
        let replies = demo_list(&config, "wdm1", Some("50")).unwrap();
        assert_eq!(
            replies[0],
            "pr \"Available demos:\n----------------\n...\n3: race002\n\""
        );
    }

    #[test]
    fn test_list_rejects_zero_start() {
        let (_dir, config) = config_with_demos(&numbered(3));
        let replies = demo_list(&config, "wdm1", Some("0")).unwrap();
        assert_eq!(replies, vec![LIST_USAGE]);
    }

    #[test]
    fn test_list_splits_long_output_between_entries() {
        let names: Vec<String> = (0..30).map(|i| format!("{:02}_{}.wdz20", i, "x".repeat(80))).collect();
        let (_dir, config) = config_with_demos(&names);
        let replies = demo_list(&config, "wdm1", None).unwrap();

        assert!(replies.len() > 1);
        for reply in &replies {
            assert!(reply.len() < MAX_STRING_CHARS);
            assert!(reply.starts_with("pr \""));
            assert!(reply.ends_with('"'));
        }
        let entries: usize = replies.iter().map(|r| r.matches(&"x".repeat(80)).count()).sum();
        assert_eq!(entries, 30);
    }

    #[test]
    fn test_get_by_index_and_dots() {
        let (_dir, config) = config_with_demos(&numbered(5));
        assert_eq!(
            demo_get(&config, "wdm1", "2").unwrap(),
            "demoget \"demos/server/wdm1/race001.wdz20\""
        );
        assert_eq!(
            demo_get(&config, "wdm1", ".").unwrap(),
            "demoget \"demos/server/wdm1/race004.wdz20\""
        );
        assert_eq!(
            demo_get(&config, "wdm1", "..").unwrap(),
            "demoget \"demos/server/wdm1/race003.wdz20\""
        );
    }

    #[test]
    fn test_get_clamps_out_of_range() {
        let (_dir, config) = config_with_demos(&numbered(2));
        assert_eq!(
            demo_get(&config, "wdm1", "99").unwrap(),
            "demoget \"demos/server/wdm1/race001.wdz20\""
        );
        assert_eq!(
            demo_get(&config, "wdm1", "......").unwrap(),
            "demoget \"demos/server/wdm1/race000.wdz20\""
        );
        assert_eq!(
            demo_get(&config, "wdm1", "junk").unwrap(),
            "demoget \"demos/server/wdm1/race000.wdz20\""
        );
    }

    #[test]
    fn test_get_not_found_is_bare() {
        let (_dir, config) = config_with_demos(&[]);
        assert_eq!(demo_get(&config, "wdm1", "1").unwrap(), "demoget");
        assert_eq!(demo_get(&config, "dm2", "1").unwrap(), "demoget");
    }

    #[test]
    fn test_download_request() {
        let mut config = DemoConfig::new("/srv", 8);
        assert!(is_download_request(&config, "demos/server/wdm1/a.wdz20"));
        assert!(is_download_request(&config, "DEMOS/Server/a.WDZ20"));
        assert!(!is_download_request(&config, "demos/server/a.txt"));
        assert!(!is_download_request(&config, "demos/serverx/a.wdz20"));
        assert!(!is_download_request(&config, "demos/server/.wdz20"));
        assert!(!is_download_request(&config, "maps/wdm1.wdz20"));

        config.demo_subdir = "cup".to_string();
        assert!(is_download_request(&config, "demos/server/cup/a.wdz20"));
        assert!(!is_download_request(&config, "demos/server/a.wdz20"));
    }
}
