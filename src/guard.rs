use crate::errors::Rejection;
use crate::settings::{normalize_extension, StorageContext};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

static LEADING_TRAVERSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\.\.[/\\])+").expect("valid regex"));
static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"|?*]"#).expect("valid regex"));
static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/\\]{2,}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafePath {
    relative: String,
    absolute: PathBuf,
}

impl SafePath {
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PathGuard {
    context: Arc<StorageContext>,
}

impl PathGuard {
    pub fn new(context: Arc<StorageContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &StorageContext {
        &self.context
    }

    pub fn validate(&self, raw: &str, allowed_extensions: Option<&[String]>) -> Result<SafePath, Rejection> {
        let max = self.context.max_path_length();
        let length = raw.chars().count();
        if length > max {
            return Err(Rejection::PathTooLong { length, max });
        }
        if raw.contains('\0') {
            return Err(Rejection::NullByteInjection);
        }

        let sanitized = sanitize(raw);

        if let Some(allowed) = allowed_extensions {
            let extension = extension_of(&sanitized);
            let permitted = allowed
                .iter()
                .any(|candidate| normalize_extension(candidate) == extension);
            if !permitted {
                return Err(Rejection::ExtensionNotAllowed { extension });
            }
        }

        let root = self.context.data_root();
        let absolute = resolve_lexically(root, &sanitized);
        let Ok(inside) = absolute.strip_prefix(root) else {
            return Err(Rejection::OutsideDataRoot);
        };

        let relative = inside
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(SafePath { relative, absolute })
    }
}

fn sanitize(raw: &str) -> String {
    let stripped = LEADING_TRAVERSAL.replace(raw, "");
    let cleaned = ILLEGAL_CHARS.replace_all(&stripped, "");
    SEPARATOR_RUNS.replace_all(&cleaned, "/").into_owned()
}

fn extension_of(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(index) => normalize_extension(&name[index + 1..]),
        None => String::new(),
    }
}

fn resolve_lexically(root: &Path, relative: &str) -> PathBuf {
    let joined = root.join(relative);
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AppSettings;

    fn guard_for(root: &Path) -> PathGuard {
        let settings = AppSettings {
            data_root: root.to_path_buf(),
            ..AppSettings::default()
        };
        PathGuard::new(Arc::new(StorageContext::from_settings(&settings).expect("context")))
    }

    fn exts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn plain_relative_path_is_accepted_unchanged() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let safe = guard
            .validate("notes/todo.txt", Some(&exts(&[".txt", ".json"])))
            .expect("accepted");
        assert_eq!(safe.relative(), "notes/todo.txt");
        assert!(safe.absolute().starts_with(guard.context().data_root()));
        assert!(safe.absolute().ends_with("notes/todo.txt"));
    }

    #[test]
    fn etc_passwd_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let result = guard.validate("../../etc/passwd", Some(&exts(&[".txt"])));
        assert!(matches!(
            result,
            Err(Rejection::OutsideDataRoot) | Err(Rejection::ExtensionNotAllowed { .. })
        ));
    }

    #[test]
    fn leading_traversal_is_stripped_not_followed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let safe = guard.validate("../../..\\notes/a.txt", None).expect("stripped");
        assert_eq!(safe.relative(), "notes/a.txt");
    }

    #[test]
    fn traversal_never_escapes_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let root = guard.context().data_root().to_path_buf();
        let inputs = [
            "a/../../b.txt",
            "a/b/../../../c.txt",
            "./../x.txt",
            "/etc/passwd",
            "//etc/passwd",
            "C:\\Windows\\system.ini",
            "..:/..:/x.txt",
            ".:./secret.txt",
            "notes/../../../../../../tmp/x.txt",
        ];
        for depth in 0..6 {
            let mut spelled = String::new();
            for step in 0..depth {
                spelled.push_str(if step % 2 == 0 { "../" } else { "..\\" });
            }
            for input in inputs {
                let candidate = format!("{}{}", spelled, input);
                if let Ok(safe) = guard.validate(&candidate, None) {
                    assert!(
                        safe.absolute().starts_with(&root),
                        "{} escaped to {}",
                        candidate,
                        safe.absolute().display()
                    );
                }
            }
        }
    }

    #[test]
    fn absolute_path_is_outside_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        assert_eq!(guard.validate("/etc/passwd", None), Err(Rejection::OutsideDataRoot));
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().join("data");
        let guard = guard_for(&root);
        let parent = guard.context().data_root().parent().expect("root has a parent");
        let sibling = parent.join("data-evil/x.txt").to_string_lossy().to_string();
        assert_eq!(guard.validate(&sibling, None), Err(Rejection::OutsideDataRoot));
    }

    #[test]
    fn length_and_null_checks_come_first() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let long = "a".repeat(1001);
        assert_eq!(
            guard.validate(&long, None),
            Err(Rejection::PathTooLong { length: 1001, max: 1000 })
        );
        assert!(guard.validate(&"a".repeat(1000), None).is_ok());
        assert_eq!(guard.validate("a\0.txt", None), Err(Rejection::NullByteInjection));
    }

    #[test]
    fn illegal_characters_are_removed_and_separators_collapsed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let safe = guard
            .validate("no<t>es//dra:ft?s\\\\a*\"b|.txt", None)
            .expect("accepted");
        assert_eq!(safe.relative(), "notes/drafts/ab.txt");
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let allowed = exts(&["txt", ".JSON"]);
        for accepted in ["a.txt", "a.TXT", "deep/b.Json", "x.y.json"] {
            assert!(guard.validate(accepted, Some(&allowed)).is_ok(), "{}", accepted);
        }
        for rejected in ["a.exe", "a.txt.exe", "noext", "dir.txt/file", "a.", ".bashrc"] {
            assert!(
                matches!(
                    guard.validate(rejected, Some(&allowed)),
                    Err(Rejection::ExtensionNotAllowed { .. })
                ),
                "{}",
                rejected
            );
        }
    }

    #[test]
    fn empty_path_is_the_root() {
        let dir = tempfile::tempdir().expect("temp dir");
        let guard = guard_for(dir.path());
        let safe = guard.validate("", None).expect("root");
        assert!(safe.is_root());
        assert_eq!(safe.absolute(), guard.context().data_root());
    }
}
