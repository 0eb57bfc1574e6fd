//! Output module for command-line reports
//!
//! This module handles:
//! - Job detail reports with their link tables
//! - Paged job listings
//! - Job counts per crawl status

mod report;
pub mod stats;

pub use report::{format_job_report, format_job_table, print_job_report, print_job_table};
pub use stats::{load_statistics, print_statistics, render_statistics, JobStatistics};
