//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryDocumentStore**: テスト・CLI 用の正本
//! - **InMemoryBlobStore** / **FsBlobStore**: アップロード済みファイル
//! - **MetadataOnlyExtractor**: サイズとページ数のみ
//! - **KeywordAnalyzer**: 決定的な解析
//! - **LogNotifier**: 送信内容をログに出すだけ
//!
//! Firestore / Cloud Storage / SMTP の実装は別クレートに置く想定。

pub mod analyzer;
pub mod blob;
pub mod extractor;
pub mod memory_store;
pub mod notifier;

pub use self::analyzer::KeywordAnalyzer;
pub use self::blob::{FsBlobStore, InMemoryBlobStore};
pub use self::extractor::MetadataOnlyExtractor;
pub use self::memory_store::{InMemoryDocumentStore, StoreSnapshot};
pub use self::notifier::LogNotifier;
