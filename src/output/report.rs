//! Plain-text job reports
//!
//! Formats single-job detail views (metrics plus the link table) and paged
//! job listings for the command line.

use crate::crawler::is_broken;
use crate::storage::{JobListing, JobQuery, JobRecord, LinkRecord};

/// Longest URL shown in a table cell before truncation
const MAX_URL_WIDTH: usize = 60;

fn truncate(url: &str) -> String {
    if url.chars().count() <= MAX_URL_WIDTH {
        url.to_string()
    } else {
        let head: String = url.chars().take(MAX_URL_WIDTH - 3).collect();
        format!("{}...", head)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Formats a job and its links as a detail report
///
/// # Arguments
///
/// * `job` - The job record
/// * `links` - Links recorded by the job's latest crawl
///
/// # Returns
///
/// A formatted multi-line string
pub fn format_job_report(job: &JobRecord, links: &[LinkRecord]) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== Job {} ===\n\n", job.id));
    out.push_str(&format!("  URL:          {}\n", job.target_url));
    out.push_str(&format!("  Status:       {}\n", job.status));
    out.push_str(&format!(
        "  Title:        {}\n",
        job.title.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "  HTML version: {}\n",
        job.html_version.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "  Headings:     h1={} h2={} h3={}\n",
        job.headings.h1, job.headings.h2, job.headings.h3
    ));
    out.push_str(&format!(
        "  Links:        {} internal, {} external, {} broken\n",
        job.internal_links, job.external_links, job.broken_links
    ));
    out.push_str(&format!(
        "  Login form:   {}\n",
        yes_no(job.has_login_form)
    ));
    out.push_str(&format!("  Created:      {}\n", job.created_at));
    out.push_str(&format!("  Updated:      {}\n", job.updated_at));

    if links.is_empty() {
        return out;
    }

    out.push_str(&format!("\nLinks ({}):\n", links.len()));
    for link in links {
        let status = match link.http_status {
            None => "-".to_string(),
            Some(0) => "n/a".to_string(),
            Some(code) => code.to_string(),
        };
        let marker = match link.http_status {
            Some(code) if is_broken(code) => " [broken]",
            _ => "",
        };
        out.push_str(&format!(
            "  {:>4}  {:<8}  {}{}\n",
            status,
            if link.is_internal { "internal" } else { "external" },
            truncate(&link.href),
            marker
        ));
    }

    out
}

/// Formats one page of a job listing as a table
pub fn format_job_table(listing: &JobListing, query: &JobQuery) -> String {
    let mut out = String::new();

    if listing.jobs.is_empty() {
        out.push_str("No jobs found.\n");
        return out;
    }

    out.push_str(&format!(
        "{:>6}  {:<8}  {:>5}  {:>5}  {:>6}  {}\n",
        "ID", "STATUS", "INT", "EXT", "BROKEN", "URL"
    ));
    for job in &listing.jobs {
        out.push_str(&format!(
            "{:>6}  {:<8}  {:>5}  {:>5}  {:>6}  {}\n",
            job.id,
            job.status,
            job.internal_links,
            job.external_links,
            job.broken_links,
            truncate(&job.target_url)
        ));
    }

    let size = u64::from(query.size.max(1));
    let pages = listing.total.div_ceil(size).max(1);
    out.push_str(&format!(
        "\nPage {} of {} ({} jobs total)\n",
        query.page, pages, listing.total
    ));

    out
}

/// Prints a job detail report to stdout
pub fn print_job_report(job: &JobRecord, links: &[LinkRecord]) {
    print!("{}", format_job_report(job, links));
}

/// Prints a job listing to stdout
pub fn print_job_table(listing: &JobListing, query: &JobQuery) {
    print!("{}", format_job_table(listing, query));
}
