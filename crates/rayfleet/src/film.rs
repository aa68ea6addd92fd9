//! Film buffers.
//!
//! A `Film` is a set of named RGB float planes of one size. Each worker
//! renders its columns into a full-size film (everything outside its tile
//! stays black) and ships it back whole; merging is a pixel-wise sum, so
//! the order in which worker images arrive does not matter.

use std::path::Path;

use anyhow::{Context, Result};
use bincode::{Decode, Encode};
use image::Rgb32FImage;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilmError {
    #[error("can't merge a {other_width}x{other_height} film into {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        other_width: u32,
        other_height: u32,
    },
    #[error("film is missing buffer {0:?}")]
    MissingBuffer(String),
}

#[derive(Debug, Clone, Encode, Decode)]
struct Plane {
    name: String,
    /// RGB triples, row-major, `3 * width * height` floats.
    pixels: Vec<f32>,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Film {
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            planes: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Add a zeroed buffer. Adding a name twice resets it.
    pub fn add_buffer(&mut self, name: &str) {
        let pixels = vec![0.0; 3 * (self.width * self.height) as usize];
        if let Some(plane) = self.planes.iter_mut().find(|p| p.name == name) {
            plane.pixels = pixels;
        } else {
            self.planes.push(Plane {
                name: name.to_owned(),
                pixels,
            });
        }
    }

    pub fn buffer_names(&self) -> impl Iterator<Item = &str> {
        self.planes.iter().map(|p| p.name.as_str())
    }

    pub fn buffer(&self, name: &str) -> Option<&[f32]> {
        self.planes
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.pixels.as_slice())
    }

    pub fn buffer_mut(&mut self, name: &str) -> Option<&mut [f32]> {
        self.planes
            .iter_mut()
            .find(|p| p.name == name)
            .map(|p| p.pixels.as_mut_slice())
    }

    /// Pixel-wise sum of `other` into `self`, buffer by buffer. Both films
    /// must have the same size and `other` must carry every buffer of
    /// `self`.
    pub fn merge(&mut self, other: &Film) -> Result<(), FilmError> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(FilmError::SizeMismatch {
                width: self.width,
                height: self.height,
                other_width: other.width,
                other_height: other.height,
            });
        }
        for plane in &mut self.planes {
            let Some(theirs) = other.buffer(&plane.name) else {
                return Err(FilmError::MissingBuffer(plane.name.clone()));
            };
            for (mine, theirs) in plane.pixels.iter_mut().zip(theirs) {
                *mine += theirs;
            }
        }
        Ok(())
    }

    /// Write every buffer as an EXR next to `stem`: the `color` buffer as
    /// `<stem>.exr`, any other as `<stem>-<buffer>.exr`. Suffixes are
    /// appended, never substituted; stems routinely contain dots (worker
    /// IPs).
    pub fn write_exr(&self, stem: &Path) -> Result<()> {
        for plane in &self.planes {
            let mut file = stem.as_os_str().to_owned();
            if plane.name != "color" {
                file.push("-");
                file.push(&plane.name);
            }
            file.push(".exr");
            let path = std::path::PathBuf::from(file);
            let image = Rgb32FImage::from_raw(self.width, self.height, plane.pixels.clone())
                .with_context(|| format!("buffer {:?} doesn't match the film size", plane.name))?;
            image
                .save(&path)
                .with_context(|| format!("can't write {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn film_with_value(value: f32) -> Film {
        let mut film = Film::new(2, 2);
        film.add_buffer("color");
        film.buffer_mut("color").unwrap().fill(value);
        film
    }

    #[test]
    fn merge_sums_pixelwise() {
        let mut final_film = film_with_value(0.0);
        final_film.merge(&film_with_value(1.0)).unwrap();
        final_film.merge(&film_with_value(2.0)).unwrap();
        assert!(final_film.buffer("color").unwrap().iter().all(|&p| p == 3.0));
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let parts = [film_with_value(1.0), film_with_value(2.0), film_with_value(4.0)];

        let mut forward = film_with_value(0.0);
        for p in &parts {
            forward.merge(p).unwrap();
        }
        let mut backward = film_with_value(0.0);
        for p in parts.iter().rev() {
            backward.merge(p).unwrap();
        }
        assert_eq!(
            forward.buffer("color").unwrap(),
            backward.buffer("color").unwrap()
        );
    }

    #[test]
    fn merge_rejects_mismatches() {
        let mut film = film_with_value(0.0);
        assert_eq!(
            film.merge(&Film::new(3, 3)),
            Err(FilmError::SizeMismatch {
                width: 2,
                height: 2,
                other_width: 3,
                other_height: 3,
            })
        );
        assert!(matches!(
            film.merge(&Film::new(2, 2)),
            Err(FilmError::MissingBuffer(_))
        ));
    }
}
