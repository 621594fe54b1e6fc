/*!
# Sheet Chat

A chat backend that answers natural-language questions about data kept in a
set of Google Sheets, built in Rust.

## Overview

The service consolidates the first sheet of several spreadsheet documents into
one in-memory dataset, keeps that dataset fresh within a configurable TTL, and
hands a snapshot of it to a language model (Gemini) together with the user's
question. Remote APIs are rate limited and slow, so the interesting part is the
refresh path: fetching with retry and backoff, bounding the consolidated size,
and publishing a new dataset without readers ever seeing a half-built one.

## Architecture

### Data refresh
- **SourceFetcher** - Walks the configured sheets in order, retries transient
  failures with exponential backoff, skips broken or empty sheets, tags every
  record with its sheet title and stops at the row cap
- **DatasetCache** - Holds the current entry and its timestamp; refreshed either
  by a background loop (memory mode) or on read once stale (file mode)
- **Stores** - Process memory, or a CSV file whose mtime is the entry timestamp

### Question answering
- **Analyst** - Gemini `generateContent` client, or a local fallback that
  describes the data when no model key is configured
- Every model call is bounded by a timeout; a call that overruns is abandoned
  and the user gets a "took too long" reply

### HTTP layer (axum)
- Health, chat, upload and reset endpoints with permissive CORS

## Modules

- **dataset**: Cell values, records, datasets and per-column summaries
- **downloader**: Dataset to CSV export (cache file, prompt sample, summary)
- **loader**: CSV and Excel import (cache file warm start, uploads)
- **source**: The spreadsheet source abstraction
- **google**: Google Sheets v4 source with service-account or API-key auth
- **fetcher**: Multi-source fetch with retry, backoff and row cap
- **cache**: Freshness-bounded dataset cache and background refresher
- **saving**: On-disk cache store
- **analyst**: Model client, local analyst and timeout wrapper
- **app**: Routing and handlers
- **config**: Environment configuration
- **error**: Error types

## REST API Endpoints

- `GET /` - Health and data status
- `POST /api/chat` - Ask a question about the current data
- `POST /api/upload` - Replace the data with an uploaded CSV/XLSX file
- `POST /api/reset` - Clear the cache
*/

pub mod analyst;
pub mod app;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod google;
pub mod loader;
pub mod saving;
pub mod source;

#[cfg(test)]
mod test_support;

/// Re-export the types most callers need
pub use cache::{DatasetCache, RefreshStrategy};
pub use config::Config;
pub use dataset::{CellValue, Dataset, Record};
pub use fetcher::{FetchPolicy, SourceFetcher};
pub use source::{SheetSource, SourceDescriptor};
