pub mod chunk;
pub mod dual;
pub mod fetcher;
pub mod parallel;

pub use chunk::{Chunk, plan};
pub use dual::{DualOutcome, DualStreamDownload, StreamPair};
pub use fetcher::{FetchOutcome, fetch_range};
pub use parallel::{DownloadOutcome, ParallelDownloader, probe_content_length};
