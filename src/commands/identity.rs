use anyhow::Result;
use calmerge_core::identity::identity_hash;
use chrono::{NaiveDate, NaiveTime};

pub fn run(date: NaiveDate, time: Option<NaiveTime>, title: &str, url: Option<&str>) -> Result<()> {
    if title.trim().is_empty() {
        anyhow::bail!("Title must not be empty");
    }

    println!("{}", identity_hash(date, time, title, url));
    Ok(())
}
