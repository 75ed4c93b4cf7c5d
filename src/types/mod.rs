//! Data model shared by the database, catalogue, planner and executor.

pub mod dependency;
pub mod package;

pub use dependency::{DependencyEdge, MatchExpr};
pub use package::{
    DirEntry, FileEntry, FileType, Message, MessageKind, Package, PackageOption, Script,
    ScriptKind, ScriptLanguage, is_valid_name, normalize_path,
};
