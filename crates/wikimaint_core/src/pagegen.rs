use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::batch::BatchReport;
use crate::mediawiki::{WikiReadApi, WikiWriteApi};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeasonData {
    pub episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EpisodeEntry {
    pub num: u32,
    pub english: String,
    #[serde(default)]
    pub chinese: String,
    #[serde(default)]
    pub pinyin: String,
    #[serde(default)]
    pub suffix: Option<String>,
}

impl EpisodeEntry {
    /// Page title: the English name, disambiguated by `suffix` when present.
    pub fn page_title(&self) -> String {
        match self.suffix.as_deref().map(str::trim) {
            Some(suffix) if !suffix.is_empty() => format!("{} ({suffix})", self.english.trim()),
            _ => self.english.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeOptions {
    pub season_name: String,
    pub season_abbr: String,
    pub conjectural: bool,
    pub watch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardOptions {
    pub rarity: String,
    pub release: String,
    pub obtained: String,
    pub start: u32,
    pub end: u32,
}

const ONES: [&str; 10] = [
    "", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];
const FIRSTS: [&str; 10] = [
    "", "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
];
const TEENS: [&str; 10] = [
    "tenth",
    "eleventh",
    "twelfth",
    "thirteenth",
    "fourteenth",
    "fifteenth",
    "sixteenth",
    "seventeenth",
    "eighteenth",
    "nineteenth",
];
const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
const TENTHS: [&str; 10] = [
    "",
    "",
    "twentieth",
    "thirtieth",
    "fortieth",
    "fiftieth",
    "sixtieth",
    "seventieth",
    "eightieth",
    "ninetieth",
];

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// English ordinal word for `n` ("twenty-first", "one hundred and fifth").
/// Values outside 1..=999 fall back to digits.
pub fn to_ordinal(n: u32) -> String {
    if n == 0 || n >= 1000 {
        return numeric_ordinal(n);
    }

    let mut out = String::new();
    let mut rest = n as usize;
    if rest >= 100 {
        out.push_str(ONES[rest / 100]);
        out.push_str(" hundred");
        rest %= 100;
        if rest == 0 {
            out.push_str("th");
            return out;
        }
        out.push_str(" and ");
    }

    if rest >= 20 {
        if rest % 10 == 0 {
            out.push_str(TENTHS[rest / 10]);
        } else {
            out.push_str(TENS[rest / 10]);
            out.push('-');
            out.push_str(FIRSTS[rest % 10]);
        }
    } else if rest >= 10 {
        out.push_str(TEENS[rest - 10]);
    } else {
        out.push_str(FIRSTS[rest]);
    }
    out
}

fn numeric_ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Download and parse the episode list for a season.
pub fn fetch_season_data<A: WikiReadApi>(api: &mut A, url: &str) -> Result<SeasonData> {
    let mut body = Vec::new();
    api.fetch_url(url, &mut body)
        .with_context(|| format!("failed to fetch season data from {url}"))?;
    parse_season_data(&body).with_context(|| format!("invalid season data at {url}"))
}

pub fn parse_season_data(body: &[u8]) -> Result<SeasonData> {
    Ok(serde_json::from_slice(body)?)
}

/// File name stem used for the season's video embeds: `,` and `!` removed,
/// everything from the first `:` dropped.
fn watch_file_stem(season_name: &str) -> String {
    let cleaned: String = season_name.chars().filter(|ch| !matches!(ch, ',' | '!')).collect();
    match cleaned.split_once(':') {
        Some((head, _)) => head.to_string(),
        None => cleaned,
    }
}

pub fn episode_page_content(options: &EpisodeOptions, episode: &EpisodeEntry) -> String {
    let abbr = options.season_abbr.trim();
    let season = options.season_name.trim();
    let num = episode.num;

    let mut content = String::from("{{Stub}}");
    if options.conjectural {
        content.push_str("{{Conjectural}}");
    }
    content.push_str(&format!(
        "\n{{{{Infobox episode|{abbr}|{num}|image={abbr}{num:02}.png}}}}\n\
         {{{{zhongwen|\u{201c}{english}\u{201d}|{chinese}|{pinyin}}}}} is the {ordinal} episode of ''[[{season}]]''.\n\
         \n==Characters present==\n{{{{TBA}}}}\n\
         \n==Summary==\n{{{{TBA}}}}\n",
        english = episode.english,
        chinese = episode.chinese,
        pinyin = episode.pinyin,
        ordinal = to_ordinal(num),
    ));
    if options.watch {
        content.push_str(&format!(
            "\n==Watch==\n[[File:{} EP{num:02}]]\n",
            watch_file_stem(season)
        ));
    }
    content.push_str(&format!(
        "\n==Navigation==\n{{{{{abbr}|uncollapsed}}}}\n{{{{zh|{}}}}}\n",
        episode.chinese
    ));
    content
}

/// Create a page for every episode in `data` that does not exist yet.
pub fn create_episode_pages<A: WikiWriteApi>(
    api: &mut A,
    options: &EpisodeOptions,
    data: &SeasonData,
) -> Result<BatchReport> {
    if options.season_name.trim().is_empty() || options.season_abbr.trim().is_empty() {
        bail!("season name and abbreviation are required");
    }
    let mut report = BatchReport::new("create-episodes");

    for episode in &data.episodes {
        let title = episode.page_title();
        if title.is_empty() {
            report.skip(format!("#{}", episode.num), "episode has no English title");
            continue;
        }
        report.processed += 1;
        let content = episode_page_content(options, episode);
        let summary = format!("Creating episode page for {title}");
        match create_if_missing(api, &title, &content, &summary) {
            Ok(true) => {
                info!(title = %title, "created episode page");
                report.succeeded.push(title);
            }
            Ok(false) => report.skip(title, "page already exists"),
            Err(error) => report.fail(title, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

/// `Month YYYY` as `YYYYMM`; unknown months become `00`, other shapes `000000`.
pub fn release_date_to_ym(release: &str) -> String {
    let parts: Vec<&str> = release.split_whitespace().collect();
    let [month, year] = parts.as_slice() else {
        return "000000".to_string();
    };
    let month = MONTHS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(month))
        .map(|index| format!("{:02}", index + 1))
        .unwrap_or_else(|| "00".to_string());
    format!("{year}{month}")
}

pub fn card_title(rarity: &str, number: u32, release: &str) -> String {
    format!("Card:XYY-{rarity}-{number:03} (Auldey {release})")
}

pub fn card_page_content(options: &CardOptions, number: u32) -> String {
    let rarity = options.rarity.trim();
    let ym = release_date_to_ym(&options.release);
    format!(
        "{{{{Card\n|front=XYY-{rarity}-{number:03}-{ym}.jpg\n|back=XYY-{rarity}-back-{ym}.jpg\n\
         |character=\n|text=\n|distributor=Auldey\n|release={release}\n|obtained={obtained}\n}}}}",
        release = options.release.trim(),
        obtained = options.obtained.trim(),
    )
}

/// Create card pages `start..=end` that do not exist yet.
pub fn create_card_pages<A: WikiWriteApi>(
    api: &mut A,
    options: &CardOptions,
) -> Result<BatchReport> {
    let rarity = options.rarity.trim();
    if rarity.is_empty() {
        bail!("card rarity is required");
    }
    if options.start > options.end {
        bail!(
            "card range start {} is after end {}",
            options.start,
            options.end
        );
    }
    let mut report = BatchReport::new("create-cards");

    for number in options.start..=options.end {
        let title = card_title(rarity, number, options.release.trim());
        report.processed += 1;
        let content = card_page_content(options, number);
        let summary = format!("Creating card page for {title}");
        match create_if_missing(api, &title, &content, &summary) {
            Ok(true) => {
                info!(title = %title, "created card page");
                report.succeeded.push(title);
            }
            Ok(false) => report.skip(title, "page already exists"),
            Err(error) => report.fail(title, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn create_if_missing<A: WikiWriteApi>(
    api: &mut A,
    title: &str,
    content: &str,
    summary: &str,
) -> Result<bool> {
    if api.page_exists(title)? {
        debug!(title, "page exists; not creating");
        return Ok(false);
    }
    api.edit_page(title, content, summary)?;
    Ok(true)
}
