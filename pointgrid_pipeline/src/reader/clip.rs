//! Optional WKT polygon clipping of reader output.

use anyhow::{Context, Result, bail, ensure};
use geo::{Contains, Coord, LineString, Point, Polygon};

/// A parsed `POLYGON` clip. The first ring is the exterior, any further
/// rings are holes.
#[derive(Clone, Debug)]
pub struct PolygonClip {
	polygon: Polygon<f64>,
}

impl PolygonClip {
	/// Parses WKT of the form `POLYGON ((x y, x y, ...), (...))`.
	pub fn from_wkt(wkt: &str) -> Result<PolygonClip> {
		let text = wkt.trim();
		let upper = text.to_ascii_uppercase();
		ensure!(upper.starts_with("POLYGON"), "expected a WKT POLYGON, got '{wkt}'");

		let body = text["POLYGON".len()..].trim();
		ensure!(
			body.starts_with('(') && body.ends_with(')'),
			"malformed WKT POLYGON '{wkt}'"
		);

		let mut rings: Vec<LineString<f64>> = Vec::new();
		for ring_text in split_rings(&body[1..body.len() - 1])? {
			rings.push(parse_ring(&ring_text)?);
		}
		ensure!(!rings.is_empty(), "WKT POLYGON has no rings");

		let exterior = rings.remove(0);
		Ok(PolygonClip {
			polygon: Polygon::new(exterior, rings),
		})
	}

	/// True if the point lies inside the exterior ring and outside every
	/// hole.
	#[must_use]
	pub fn contains(&self, x: f64, y: f64) -> bool {
		self.polygon.contains(&Point::new(x, y))
	}
}

/// Splits the body of a POLYGON into its depth-1 parenthesized ring texts.
fn split_rings(body: &str) -> Result<Vec<String>> {
	let mut rings = Vec::new();
	let mut depth = 0usize;
	let mut start = 0usize;
	for (i, c) in body.char_indices() {
		match c {
			'(' => {
				if depth == 0 {
					start = i + 1;
				}
				depth += 1;
			}
			')' => {
				ensure!(depth > 0, "unbalanced parentheses in WKT POLYGON");
				depth -= 1;
				if depth == 0 {
					rings.push(body[start..i].to_string());
				}
			}
			_ => {}
		}
	}
	ensure!(depth == 0, "unbalanced parentheses in WKT POLYGON");
	Ok(rings)
}

fn parse_ring(text: &str) -> Result<LineString<f64>> {
	let mut coords: Vec<Coord<f64>> = Vec::new();
	for pair in text.split(',') {
		let mut parts = pair.split_whitespace();
		let x: f64 = parts
			.next()
			.context("missing x coordinate in WKT ring")?
			.parse()
			.context("invalid x coordinate in WKT ring")?;
		let y: f64 = parts
			.next()
			.context("missing y coordinate in WKT ring")?
			.parse()
			.context("invalid y coordinate in WKT ring")?;
		coords.push(Coord { x, y });
	}
	if coords.len() < 3 {
		bail!("WKT ring needs at least 3 coordinates, got {}", coords.len());
	}
	Ok(LineString::from(coords))
}
