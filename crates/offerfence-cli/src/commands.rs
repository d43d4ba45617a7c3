//! Line commands read from stdin.

use offerfence_core::Coordinate;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `location <lat>,<lon>` or `location <lat> <lon>`
    Location(Coordinate),
    /// `push <json>`: one raw push payload portion
    Push(String),
    Redeem(i64),
    /// OS region callbacks, by geofence key
    Enter(String),
    Exit(String),
    Background,
    Flush,
    Refresh,
    Save,
    Status,
    Reset,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "location" | "loc" => parse_coordinate(rest).map(Command::Location),
            "push" if !rest.is_empty() => Ok(Command::Push(rest.to_string())),
            "redeem" => rest
                .parse()
                .map(Command::Redeem)
                .map_err(|_| format!("Invalid campaign id: '{}'", rest)),
            "enter" if !rest.is_empty() => Ok(Command::Enter(rest.to_string())),
            "exit" if !rest.is_empty() => Ok(Command::Exit(rest.to_string())),
            "background" | "bg" => Ok(Command::Background),
            "flush" => Ok(Command::Flush),
            "refresh" => Ok(Command::Refresh),
            "save" => Ok(Command::Save),
            "status" => Ok(Command::Status),
            "reset" => Ok(Command::Reset),
            "help" | "?" => Ok(Command::Help),
            "quit" | "q" => Ok(Command::Quit),
            "push" | "enter" | "exit" => Err(format!("'{}' needs an argument", name)),
            "" => Err("Empty command".to_string()),
            other => Err(format!("Unknown command: '{}'", other)),
        }
    }
}

fn parse_coordinate(text: &str) -> Result<Coordinate, String> {
    let mut parts = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());

    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("Expected '<lat>,<lon>', got '{}'", text));
    };
    let latitude: f64 = lat
        .parse()
        .map_err(|_| format!("Invalid latitude: '{}'", lat))?;
    let longitude: f64 = lon
        .parse()
        .map_err(|_| format!("Invalid longitude: '{}'", lon))?;

    let coordinate = Coordinate::new(latitude, longitude);
    if !coordinate.is_valid() {
        return Err(format!("Coordinate out of range: {}", coordinate));
    }
    Ok(coordinate)
}

pub const HELP: &str = "\
Commands:
  location <lat>,<lon>   feed a location fix
  enter <key>            region enter callback (key = scheduleId_deviceUid)
  exit <key>             region exit callback
  push <json>            feed one push payload portion
  redeem <campaignId>    mark a coupon redeemed
  refresh                poll nearby offers at the last location
  flush                  upload queued tracking events
  background             save state as if the app was backgrounded
  save                   save state now
  status                 show engine counters
  reset                  forget all engine state
  quit                   save and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            Command::parse("location 51.5,-0.12").unwrap(),
            Command::Location(Coordinate::new(51.5, -0.12))
        );
        assert_eq!(
            Command::parse("  loc 51.5 -0.12 ").unwrap(),
            Command::Location(Coordinate::new(51.5, -0.12))
        );
    }

    #[test]
    fn test_parse_location_errors() {
        assert!(Command::parse("location").is_err());
        assert!(Command::parse("location 51.5").is_err());
        assert!(Command::parse("location abc,1").is_err());
        assert!(Command::parse("location 95,0").is_err());
        assert!(Command::parse("location 1,2,3").is_err());
    }

    #[test]
    fn test_parse_push_keeps_payload() {
        let cmd = Command::parse(r#"push {"a": 1, "b": "x y"}"#).unwrap();
        assert_eq!(cmd, Command::Push(r#"{"a": 1, "b": "x y"}"#.to_string()));
        assert!(Command::parse("push").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("redeem 7").unwrap(), Command::Redeem(7));
        assert!(Command::parse("redeem seven").is_err());
        assert_eq!(
            Command::parse("exit 42_dev").unwrap(),
            Command::Exit("42_dev".to_string())
        );
        assert_eq!(Command::parse("STATUS").unwrap(), Command::Status);
        assert_eq!(Command::parse("q").unwrap(), Command::Quit);
        assert!(Command::parse("").is_err());
        assert!(Command::parse("dance").is_err());
    }
}
