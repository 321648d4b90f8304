//! folio: blog companion services.
//!
//! - [`idcode`] / [`referrals`]: referral records with sequential ID codes
//! - [`reader`]: chunked read-aloud playback of articles
//! - [`api`]: the HTTP routes the site calls (speech, summaries, views, likes)

pub mod api;
pub mod config;
pub mod engagement;
pub mod gemini;
pub mod idcode;
pub mod notifier;
pub mod reader;
pub mod referrals;
