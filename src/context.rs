//! The context builder: turns a source-to-destination package/file mapping
//! into everything the header patcher needs — derived redirects, a file
//! rename map, and string substitution tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::name::QualifiedName;
use crate::redirect::{RedirectDatabase, RedirectFlags, RedirectRule};

/// One package being renamed/moved, as supplied by the caller.
#[derive(Debug, Clone)]
pub struct PackageMove {
    pub old_package: QualifiedName,
    pub new_package: QualifiedName,
    pub old_file: PathBuf,
    pub new_file: PathBuf,
}

/// Everything the header patcher derives once, up front, from a batch of
/// package moves: the redirect rules those moves imply, the source-to-
/// destination file map, and the string substitution tables used for
/// best-effort in-place text rewriting.
#[derive(Debug, Default)]
pub struct Context {
    pub derived_redirects: Vec<RedirectRule>,
    pub file_renames: BTreeMap<PathBuf, PathBuf>,
    pub string_replacements: BTreeMap<String, String>,
    pub string_mount_replacements: BTreeMap<String, String>,
    pub verse_mount_replacements: BTreeMap<String, String>,
    pub dependent_packages: BTreeSet<QualifiedName>,
}

impl Context {
    /// Mode A: build a context from an explicit list of old/new package and
    /// file pairs supplied directly by the caller.
    pub fn from_moves(moves: &[PackageMove]) -> Context {
        let mut ctx = Context::default();

        for mv in moves {
            ctx.add_derived_redirects(mv);

            if is_verse_package(&mv.old_package) {
                ctx.add_verse_mount(mv);
            } else {
                ctx.file_renames
                    .insert(mv.old_file.clone(), mv.new_file.clone());
            }

            ctx.add_string_substitutions(mv);
        }

        ctx
    }

    /// Mode B: build a context from a single pattern rename (e.g. moving an
    /// entire `/Game/Old/...` subtree to `/Game/New/...`), applied across
    /// every file under `root` whose package path starts with `old_prefix`.
    pub fn from_pattern_rename(
        root: &Path,
        old_prefix: &str,
        new_prefix: &str,
        files: impl IntoIterator<Item = PathBuf>,
    ) -> Context {
        let moves: Vec<PackageMove> = files
            .into_iter()
            .filter_map(|file| {
                let relative = file.strip_prefix(root).ok()?;
                let package_path = path_to_package_name(relative)?;
                if !package_path.starts_with(old_prefix) {
                    return None;
                }
                let new_package_path = format!("{}{}", new_prefix, &package_path[old_prefix.len()..]);
                let new_file = root.join(package_name_to_path(&new_package_path, &file));

                Some(PackageMove {
                    old_package: QualifiedName::parse(&package_path).ok()?,
                    new_package: QualifiedName::parse(&new_package_path).ok()?,
                    old_file: file,
                    new_file,
                })
            })
            .collect();

        Context::from_moves(&moves)
    }

    /// Installs `derived_redirects` into `db` and returns the database back
    /// to the caller so it can be threaded into the header patcher.
    pub fn apply_to(&self, db: &RedirectDatabase) {
        db.add_redirect_list(self.derived_redirects.clone());
    }

    /// Walks the transitive set of packages that reference any package
    /// renamed by this context, using `dependency_oracle` to look up a
    /// package's direct dependencies. Detects cycles the same way
    /// [`crate::redirect::RedirectDatabase::resolve_chain`] does: first
    /// repeated node wins, no infinite recursion.
    pub fn gather_dependent_packages<F>(&mut self, roots: &[QualifiedName], mut dependency_oracle: F)
    where
        F: FnMut(&QualifiedName) -> Vec<QualifiedName>,
    {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<QualifiedName> = roots.to_vec();

        while let Some(pkg) = stack.pop() {
            if !seen.insert(pkg.clone()) {
                continue;
            }
            for dep in dependency_oracle(&pkg) {
                if !seen.contains(&dep) {
                    stack.push(dep);
                }
            }
        }

        self.dependent_packages = seen;
    }

    /// Expands `derived_redirects` to cover every package in
    /// `dependent_packages` that lives under one of `moves`' source
    /// packages, preserving its path relative to that source package (spec
    /// §4.C item 1). Call after [`Self::gather_dependent_packages`] has
    /// populated `dependent_packages`; a no-op otherwise. Packages shaped
    /// like `<root>/__ExternalActors__/<path>/<hash2>/<hash1>/<name>` (or
    /// `__ExternalObjects__`) get only their `<path>` component remapped,
    /// with the hash directories and leaf name carried over unchanged.
    pub fn expand_dependent_packages(&mut self, moves: &[PackageMove]) {
        let dependents: Vec<QualifiedName> = self.dependent_packages.iter().cloned().collect();
        for dep in dependents {
            let dep_path = dep.package();
            for mv in moves {
                let sp = mv.old_package.package();
                if dep_path == sp {
                    continue;
                }
                let dp = mv.new_package.package();
                if let Some(new_path) = remap_dependent_path(dep_path, sp, dp) {
                    self.derived_redirects.push(RedirectRule::new(
                        QualifiedName::new(dep_path, "", ""),
                        QualifiedName::new(new_path, "", ""),
                        RedirectFlags::TYPE_PACKAGE,
                    ));
                    break;
                }
            }
        }
    }

    fn add_derived_redirects(&mut self, mv: &PackageMove) {
        let sp = mv.old_package.package();
        let dp = mv.new_package.package();
        let old_object = package_basename(sp);
        let new_object = package_basename(dp);

        // Package: SP -> DP
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, "", ""),
            QualifiedName::new(dp, "", ""),
            RedirectFlags::TYPE_PACKAGE,
        ));

        // Package|Object: SP.OldObject -> DP.NewObject
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, "", old_object),
            QualifiedName::new(dp, "", new_object),
            RedirectFlags::TYPE_PACKAGE | RedirectFlags::TYPE_OBJECT,
        ));

        // Object (prefix): SP.OldObject.* -> DP.NewObject.*
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, format!("{old_object}..."), ""),
            QualifiedName::new(dp, format!("{new_object}..."), ""),
            RedirectFlags::TYPE_OBJECT | RedirectFlags::OPTION_MATCH_PREFIX,
        ));

        // Object (prefix, scoped to a level's persistent actor list):
        // SP.OldObject.PersistentLevel.* -> DP.NewObject.PersistentLevel.*
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, format!("{old_object}.PersistentLevel..."), ""),
            QualifiedName::new(dp, format!("{new_object}.PersistentLevel..."), ""),
            RedirectFlags::TYPE_OBJECT | RedirectFlags::OPTION_MATCH_PREFIX,
        ));

        // Class|Package: SP.OldObject_C -> DP.NewObject_C
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, "", format!("{old_object}_C")),
            QualifiedName::new(dp, "", format!("{new_object}_C")),
            RedirectFlags::TYPE_CLASS | RedirectFlags::TYPE_PACKAGE,
        ));

        // Class|Package: SP.Default__OldObject_C -> DP.Default__NewObject_C
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, "", format!("Default__{old_object}_C")),
            QualifiedName::new(dp, "", format!("Default__{new_object}_C")),
            RedirectFlags::TYPE_CLASS | RedirectFlags::TYPE_PACKAGE,
        ));

        // Class|Package: SP.OldObjectEditorOnlyData -> DP.NewObjectEditorOnlyData
        self.derived_redirects.push(RedirectRule::new(
            QualifiedName::new(sp, "", format!("{old_object}EditorOnlyData")),
            QualifiedName::new(dp, "", format!("{new_object}EditorOnlyData")),
            RedirectFlags::TYPE_CLASS | RedirectFlags::TYPE_PACKAGE,
        ));

        // Package-root prefix redirect whenever the roots differ, so that
        // anything still addressed relative to the old root resolves.
        let old_root = package_root(sp);
        let new_root = package_root(dp);
        if old_root != new_root {
            self.derived_redirects.push(RedirectRule::new(
                QualifiedName::new(format!("{old_root}..."), "", ""),
                QualifiedName::new(format!("{new_root}..."), "", ""),
                RedirectFlags::TYPE_PACKAGE | RedirectFlags::OPTION_MATCH_PREFIX,
            ));
        }
    }

    fn add_verse_mount(&mut self, mv: &PackageMove) {
        let old_mount = format!("/localhost/{}", mv.old_package.package().trim_start_matches('/'));
        let new_mount = format!("/localhost/{}", mv.new_package.package().trim_start_matches('/'));
        self.verse_mount_replacements.insert(old_mount, new_mount);
    }

    fn add_string_substitutions(&mut self, mv: &PackageMove) {
        self.string_replacements.insert(
            mv.old_package.package().to_string(),
            mv.new_package.package().to_string(),
        );

        if let (Some(old_dir), Some(new_dir)) = (
            mv.old_file.parent().and_then(|p| p.to_str()),
            mv.new_file.parent().and_then(|p| p.to_str()),
        ) {
            self.string_mount_replacements
                .insert(old_dir.to_string(), new_dir.to_string());
        }
    }
}

fn is_verse_package(name: &QualifiedName) -> bool {
    name.package().starts_with("/Verse.org/")
}

/// The last path segment of a package path, e.g. `"Foo"` for `/Game/Bar/Foo`.
fn package_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The top-level mount a package path lives under, e.g. `"/Game"` for
/// `/Game/Bar/Foo`.
fn package_root(path: &str) -> &str {
    match path.get(1..).and_then(|rest| rest.find('/')) {
        Some(i) => &path[..i + 1],
        None => path,
    }
}

const EXTERNAL_ACTOR_MARKERS: [&str; 2] = ["/__ExternalActors__/", "/__ExternalObjects__/"];

/// A parsed `<root>/__ExternalActors__/<path>/<hash2>/<hash1>/<name>` package
/// path (or the `__ExternalObjects__` variant).
struct ExternalActorPath {
    root: String,
    marker: &'static str,
    path: String,
    hash2: String,
    hash1: String,
    name: String,
}

fn parse_external_actor_path(full: &str) -> Option<ExternalActorPath> {
    for marker in EXTERNAL_ACTOR_MARKERS {
        let Some(pos) = full.find(marker) else {
            continue;
        };
        let root = full[..pos].to_string();
        let rest = &full[pos + marker.len()..];
        let mut segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 3 {
            continue;
        }
        let name = segments.pop().unwrap().to_string();
        let hash1 = segments.pop().unwrap().to_string();
        let hash2 = segments.pop().unwrap().to_string();
        let path = segments.join("/");
        return Some(ExternalActorPath {
            root,
            marker,
            path,
            hash2,
            hash1,
            name,
        });
    }
    None
}

fn format_external_actor_path(p: &ExternalActorPath) -> String {
    format!(
        "{}{}{}/{}/{}/{}",
        p.root, p.marker, p.path, p.hash2, p.hash1, p.name
    )
}

/// Strips `root/` off the front of `path`, if present.
fn root_relative<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    path.strip_prefix(root)?.strip_prefix('/')
}

/// Derives `dep_path`'s new location given that `sp` was renamed to `dp`,
/// preserving `dep_path`'s structure relative to `sp`. Returns `None` if
/// `dep_path` doesn't live under `sp`.
///
/// Handles the `__ExternalActors__`/`__ExternalObjects__` special case by
/// remapping only the `<path>` component between the marker and the two
/// trailing hash directories, leaving the root, the hash directories, and
/// the leaf name untouched.
fn remap_dependent_path(dep_path: &str, sp: &str, dp: &str) -> Option<String> {
    if let Some(parsed) = parse_external_actor_path(dep_path) {
        let sp_rel = root_relative(sp, &parsed.root)?;
        let new_path = if parsed.path == sp_rel {
            root_relative(dp, &parsed.root)
                .map(str::to_string)
                .unwrap_or_else(|| dp.trim_start_matches('/').to_string())
        } else {
            let suffix = parsed.path.strip_prefix(sp_rel)?;
            if !suffix.starts_with('/') {
                return None;
            }
            let dp_rel = root_relative(dp, &parsed.root)
                .map(str::to_string)
                .unwrap_or_else(|| dp.trim_start_matches('/').to_string());
            format!("{dp_rel}{suffix}")
        };
        return Some(format_external_actor_path(&ExternalActorPath {
            path: new_path,
            ..parsed
        }));
    }

    let suffix = dep_path.strip_prefix(sp)?;
    if suffix.is_empty() || suffix.starts_with('/') {
        Some(format!("{dp}{suffix}"))
    } else {
        None
    }
}

/// Converts a relative asset file path (e.g. `Game/Foo/Bar.uasset`) into a
/// package path (`/Game/Foo/Bar`), stripping the extension.
fn path_to_package_name(relative: &Path) -> Option<String> {
    let without_ext = relative.with_extension("");
    let s = without_ext.to_str()?;
    Some(format!("/{}", s.replace(std::path::MAIN_SEPARATOR, "/")))
}

/// The inverse of [`path_to_package_name`]: rebuilds a file path for
/// `new_package_path`, keeping the original file's extension.
fn package_name_to_path(new_package_path: &str, original_file: &Path) -> PathBuf {
    let ext = original_file.extension().and_then(|e| e.to_str());
    let trimmed = new_package_path.trim_start_matches('/');
    let mut path = PathBuf::from(trimmed.replace('/', &std::path::MAIN_SEPARATOR.to_string()));
    if let Some(ext) = ext {
        path.set_extension(ext);
    }
    path
}
