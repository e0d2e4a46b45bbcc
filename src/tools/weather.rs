//! Local weather tool backed by deterministic mock data.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_args, ToolContext, ToolDefinition, ToolFuture};
use crate::{AppError, Result};

const CONDITIONS: [&str; 5] = ["sunny", "partly cloudy", "overcast", "light rain", "windy"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Unit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    location: String,
    #[serde(default)]
    unit: Unit,
}

/// Definition of `get_weather`.
#[must_use]
pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        "Get the current weather for a location.",
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string", "description": "City name, e.g. Oslo" },
                "unit": { "type": "string", "enum": ["celsius", "fahrenheit"], "default": "celsius" }
            },
            "required": ["location"]
        }),
        get_weather,
    )
}

fn get_weather(args: Map<String, Value>, _ctx: ToolContext<'_>) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: WeatherArgs = parse_args("get_weather", args)?;
        report(&args.location, args.unit)
    })
}

/// Same location always yields the same report.
fn report(location: &str, unit: Unit) -> Result<Value> {
    let location = location.trim();
    if location.is_empty() {
        return Err(AppError::ToolExecution(
            "get_weather: location must not be empty".into(),
        ));
    }

    let seed = location
        .to_lowercase()
        .bytes()
        .fold(0_u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let celsius = i64::from(seed % 35) - 5;
    let temperature = match unit {
        Unit::Celsius => celsius,
        Unit::Fahrenheit => celsius * 9 / 5 + 32,
    };
    let index = usize::try_from(seed / 35).unwrap_or_default() % CONDITIONS.len();
    let conditions = CONDITIONS[index];
    let humidity = 30 + (seed / 7) % 60;

    Ok(json!({
        "location": location,
        "temperature": temperature,
        "unit": match unit { Unit::Celsius => "celsius", Unit::Fahrenheit => "fahrenheit" },
        "conditions": conditions,
        "humidity": humidity,
    }))
}
