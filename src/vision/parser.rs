//! Structured field extraction from recognized card text
//!
//! Heuristic, single-pass parsing: the first line satisfying a rule fills the
//! field and later matches are ignored. Each field is evaluated on its own, so
//! one line may fill several fields.

use regex::Regex;
use std::sync::LazyLock;

use super::ocr::RecognizedTextLine;

/// Four-digit years from 1900 to 2039
pub const YEAR_PATTERN: &str = r"\b(19\d{2}|20[0-3]\d)\b";

/// Known team names, matched by case-insensitive containment in dictionary order
///
/// Full names come first, then city abbreviations, then bare nicknames, so a
/// line naming a team in full resolves to the full name. Nicknames that
/// contain other nicknames ("Hornets" / "Nets", "Vikings" / "Kings") are listed
/// before them.
pub const TEAM_NAMES: &[&str] = &[
    // Basketball, full names
    "Atlanta Hawks", "Boston Celtics", "Brooklyn Nets", "Charlotte Hornets", "Chicago Bulls",
    "Cleveland Cavaliers", "Dallas Mavericks", "Denver Nuggets", "Detroit Pistons",
    "Golden State Warriors", "Houston Rockets", "Indiana Pacers", "Los Angeles Clippers",
    "Los Angeles Lakers", "Memphis Grizzlies", "Miami Heat", "Milwaukee Bucks",
    "Minnesota Timberwolves", "New Orleans Pelicans", "New York Knicks",
    "Oklahoma City Thunder", "Orlando Magic", "Philadelphia 76ers", "Phoenix Suns",
    "Portland Trail Blazers", "Sacramento Kings", "San Antonio Spurs", "Toronto Raptors",
    "Utah Jazz", "Washington Wizards",
    // Baseball, full names
    "Arizona Diamondbacks", "Atlanta Braves", "Baltimore Orioles", "Boston Red Sox",
    "Chicago Cubs", "Chicago White Sox", "Cincinnati Reds", "Cleveland Guardians",
    "Colorado Rockies", "Detroit Tigers", "Houston Astros", "Kansas City Royals",
    "Los Angeles Angels", "Los Angeles Dodgers", "Miami Marlins", "Milwaukee Brewers",
    "Minnesota Twins", "New York Mets", "New York Yankees", "Oakland Athletics",
    "Philadelphia Phillies", "Pittsburgh Pirates", "San Diego Padres",
    "San Francisco Giants", "Seattle Mariners", "St. Louis Cardinals", "Tampa Bay Rays",
    "Texas Rangers", "Toronto Blue Jays", "Washington Nationals",
    // Football, full names
    "Arizona Cardinals", "Atlanta Falcons", "Baltimore Ravens", "Buffalo Bills",
    "Carolina Panthers", "Chicago Bears", "Cincinnati Bengals", "Cleveland Browns",
    "Dallas Cowboys", "Denver Broncos", "Detroit Lions", "Green Bay Packers",
    "Houston Texans", "Indianapolis Colts", "Jacksonville Jaguars", "Kansas City Chiefs",
    "Las Vegas Raiders", "Los Angeles Chargers", "Los Angeles Rams", "Miami Dolphins",
    "Minnesota Vikings", "New England Patriots", "New Orleans Saints", "New York Giants",
    "New York Jets", "Philadelphia Eagles", "Pittsburgh Steelers", "San Francisco 49ers",
    "Seattle Seahawks", "Tampa Bay Buccaneers", "Tennessee Titans", "Washington Commanders",
    // Abbreviated city forms
    "LA Lakers", "LA Clippers", "LA Dodgers", "LA Angels", "LA Rams", "LA Chargers",
    "NY Knicks", "NY Yankees", "NY Mets", "NY Giants", "NY Jets", "GS Warriors",
    "OKC Thunder", "SF Giants", "SF 49ers", "KC Royals", "KC Chiefs", "TB Rays",
    // Nicknames, containing names ahead of the names they contain
    "Seahawks", "Vikings",
    "Hawks", "Celtics", "Hornets", "Nets", "Bulls", "Cavaliers", "Cavs", "Mavericks", "Mavs",
    "Nuggets", "Pistons", "Warriors", "Rockets", "Pacers", "Clippers", "Lakers", "Grizzlies",
    "Heat", "Bucks", "Timberwolves", "Pelicans", "Knicks", "Thunder", "Magic", "76ers",
    "Sixers", "Suns", "Trail Blazers", "Blazers", "Kings", "Spurs", "Raptors", "Jazz", "Wizards",
    "Diamondbacks", "Braves", "Orioles", "Red Sox", "White Sox", "Cubs", "Reds", "Guardians",
    "Rockies", "Tigers", "Astros", "Royals", "Angels", "Dodgers", "Marlins", "Brewers",
    "Twins", "Mets", "Yankees", "Athletics", "Phillies", "Pirates", "Padres", "Giants",
    "Mariners", "Cardinals", "Rays", "Rangers", "Blue Jays", "Nationals",
    "Falcons", "Ravens", "Bills", "Panthers", "Bears", "Bengals", "Browns", "Cowboys",
    "Broncos", "Lions", "Packers", "Texans", "Colts", "Jaguars", "Chiefs", "Raiders",
    "Chargers", "Rams", "Dolphins", "Patriots", "Saints", "Jets", "Eagles",
    "Steelers", "49ers", "Buccaneers", "Titans", "Commanders",
];

static DEFAULT_PARSER: LazyLock<FieldParser> = LazyLock::new(FieldParser::default);

/// Fields pulled out of a card's text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFields {
    pub player_name: Option<String>,
    pub year: Option<i32>,
    pub team: Option<String>,
    /// All recognized lines joined with newlines, trimmed
    pub all_text: String,
}

impl ParsedFields {
    /// No structured field and no text at all
    pub fn is_empty(&self) -> bool {
        self.player_name.is_none() && self.year.is_none() && self.team.is_none() && self.all_text.is_empty()
    }
}

/// Regex and dictionary based field parser
#[derive(Debug, Clone)]
pub struct FieldParser {
    year: Regex,
    /// (display name, lowercase form) in lookup order
    teams: Vec<(String, String)>,
}

impl FieldParser {
    /// Parser with a custom team dictionary; order is lookup order
    pub fn with_teams<I, S>(teams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let teams = teams
            .into_iter()
            .map(Into::into)
            .map(|name: String| {
                let lower = name.to_lowercase();
                (name, lower)
            })
            .collect();

        Self {
            year: Regex::new(YEAR_PATTERN).expect("year pattern is valid"),
            teams,
        }
    }

    /// First year in the accepted range found in `text`
    pub fn find_year(&self, text: &str) -> Option<i32> {
        self.year
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// First dictionary entry contained in `text` (case-insensitive)
    pub fn find_team(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.teams
            .iter()
            .find(|(_, needle)| lower.contains(needle.as_str()))
            .map(|(name, _)| name.as_str())
    }

    /// Two or more tokens, each capitalized or a single character, with no
    /// year and no team name in the line
    pub fn looks_like_player_name(&self, text: &str) -> bool {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < 2 {
            return false;
        }

        let capitalized = tokens.iter().all(|token| {
            token.chars().count() <= 1 || token.chars().next().is_some_and(char::is_uppercase)
        });

        capitalized && self.find_year(text).is_none() && self.find_team(text).is_none()
    }

    /// Parse recognized lines, first match wins per field
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> ParsedFields {
        let mut fields = ParsedFields::default();

        for line in lines {
            let text = line.as_ref().trim();
            if text.is_empty() {
                continue;
            }

            if fields.year.is_none() {
                fields.year = self.find_year(text);
            }
            if fields.team.is_none() {
                fields.team = self.find_team(text).map(str::to_string);
            }
            if fields.player_name.is_none() && self.looks_like_player_name(text) {
                fields.player_name = Some(text.to_string());
            }
        }

        fields.all_text = lines
            .iter()
            .map(|l| l.as_ref())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        fields
    }

    /// Parse recognizer output
    pub fn parse_lines(&self, lines: &[RecognizedTextLine]) -> ParsedFields {
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        self.parse(&texts)
    }
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::with_teams(TEAM_NAMES.iter().copied())
    }
}

/// Parse with the built-in team dictionary
pub fn parse<S: AsRef<str>>(lines: &[S]) -> ParsedFields {
    DEFAULT_PARSER.parse(lines)
}
