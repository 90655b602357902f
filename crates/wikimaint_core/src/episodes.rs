use std::fmt;

use serde::Serialize;

/// Season abbreviations recognized in title-card file names, in match order.
pub const DEFAULT_SEASONS: &[&str] = &[
    "s1", "pgabbw", "xyyyhtl", "pgsg", "yyydh", "jos", "yykldyn", "sd", "qsmxxyy",
    "happy happy bang bang", "hhbb", "gkljy", "tac", "jjdlm", "thd", "kxrj", "hf", "kxfcs", "ptac",
    "lyyddc", "dlw", "yyxxy", "the tailor's closet", "ttc", "ycdmx", "lyb", "mmlfk", "aitpw",
    "yssjlxj", "mttnw", "xh1", "xhcsj", "tld", "yyxzt", "aits", "shlxj", "mttnw2", "xh2", "woi",
    "fmdzz", "flying island", "fitsa", "qhtkd", "mttnw3", "xh3", "mld", "ycshz", "ys1", "woi2",
    "rat", "kskjb", "mttnw4", "xh4", "tiag", "qqwxk", "mld2", "ys2", "mld3", "ys3", "atdf",
    "ygdyj", "dfv", "kcsl", "ultimate battle", "mld4", "ys4", "ubtng", "jzcsd", "mld5", "ys5",
    "tgr", "qhdyj", "mld6", "ys6", "tst", "ycsjc", "mld7", "ys7", "moa", "aysmy",
    "explore wolffy's mind", "mld8", "ys8", "ewm", "xsjqy", "mld9", "ys9", "ch", "fkcny", "mld10",
    "ys10", "mwr", "qxdyj", "mld11", "ys11", "nwc", "kyxyz", "atwi20d", "atwi2d", "atwitd",
    "xyyysb", "epg", "yydyxyy", "mjt", "mwmr", "jrjjhtl", "pgfc", "pgfc1", "zqyxt1", "anp", "ap",
    "pgfc2", "zqyxt2", "saf", "pgfc3", "pgfctec", "zqyxt3", "tec", "pgfc4", "zqyxt4", "tatw",
    "pgfc5", "zqyxt5", "iw", "pgfc6", "zqyxt6", "ft", "mgs", "yyqmx", "mgs2", "mgsii", "yyqmx2",
    "movie1", "m1", "tsa", "nqct", "movie2", "m2", "dttaotlt", "hhsw", "movie3", "m3", "mctsa",
    "tndgg", "movie4", "m4", "miaotdt", "kxcln", "movie5", "m5", "tma", "xqyygsn", "movie6", "m6",
    "mtp", "fmqyj", "movie7", "m7", "apg", "ynxyy", "movie8", "m8", "dff", "kcwl", "movie9", "m9",
    "twg", "sh", "movie10", "m10", "bnd", "ygpx", "live-action1", "la1", "ilw", "wahtl",
    "live-action2", "la2", "ilw2", "wahtl2",
];

/// A `{{ep|SEASON|NUMBER}}` link target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeRef {
    pub season: String,
    pub number: String,
}

impl fmt::Display for EpisodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{ep|{}|{}}}}}", self.season, self.number)
    }
}

/// Ordered table of season abbreviations. Earlier entries win when several
/// abbreviations could prefix the same file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonTable {
    seasons: Vec<String>,
}

impl Default for SeasonTable {
    fn default() -> Self {
        Self::new(DEFAULT_SEASONS)
    }
}

impl SeasonTable {
    pub fn new<I, S>(seasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            seasons: seasons
                .into_iter()
                .map(|season| season.as_ref().trim().to_lowercase())
                .filter(|season| !season.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.seasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seasons.is_empty()
    }

    pub fn contains(&self, season: &str) -> bool {
        let season = season.trim().to_lowercase();
        self.seasons.iter().any(|entry| *entry == season)
    }

    /// Episode reference for a title card named `File:{season}{digits}.png`.
    ///
    /// Leading zeros are stripped from the digit run; a run of zeros only
    /// yields nothing.
    pub fn episode_for_file(&self, title: &str) -> Option<EpisodeRef> {
        let lowered = title.trim().to_lowercase();
        let stem = lowered.strip_prefix("file:")?.strip_suffix(".png")?;

        for season in &self.seasons {
            let Some(digits) = stem.strip_prefix(season.as_str()) else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
                continue;
            }
            let number = digits.trim_start_matches('0');
            if number.is_empty() {
                return None;
            }
            return Some(EpisodeRef {
                season: season.clone(),
                number: number.to_string(),
            });
        }

        None
    }
}
