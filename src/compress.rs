//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Lzop,
    Lz4,
    Gzip,
    Pigz,
    Bzip2,
    Xz,
    None,
}

pub struct CompressCommand {
    pub compress: (&'static str, &'static [&'static str]),
    pub decompress: (&'static str, &'static [&'static str]),
}

impl Compression {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lzop" => Some(Self::Lzop),
            "lz4" => Some(Self::Lz4),
            "gzip" => Some(Self::Gzip),
            "pigz" => Some(Self::Pigz),
            "bzip2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lzop => "lzop",
            Self::Lz4 => "lz4",
            Self::Gzip => "gzip",
            Self::Pigz => "pigz",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::None => "none",
        }
    }

    /// `None` for `Compression::None`: the pipeline builder omits the
    /// compress/decompress stages entirely rather than running a no-op pass.
    pub fn command(&self) -> Option<CompressCommand> {
        match self {
            Self::Lzop => Some(CompressCommand {
                compress: ("lzop", &[]),
                decompress: ("lzop", &["-dfc"]),
            }),
            Self::Lz4 => Some(CompressCommand {
                compress: ("lz4", &[]),
                decompress: ("lz4", &["-dc"]),
            }),
            Self::Gzip => Some(CompressCommand {
                compress: ("gzip", &[]),
                decompress: ("gzip", &["-dc"]),
            }),
            Self::Pigz => Some(CompressCommand {
                compress: ("pigz", &[]),
                decompress: ("pigz", &["-dc"]),
            }),
            Self::Bzip2 => Some(CompressCommand {
                compress: ("bzip2", &[]),
                decompress: ("bzip2", &["-dc"]),
            }),
            Self::Xz => Some(CompressCommand {
                compress: ("xz", &[]),
                decompress: ("xz", &["-dc"]),
            }),
            Self::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_name() {
        for c in [
            Compression::Lzop,
            Compression::Lz4,
            Compression::Gzip,
            Compression::Pigz,
            Compression::Bzip2,
            Compression::Xz,
            Compression::None,
        ] {
            assert_eq!(Compression::parse(c.as_str()), Some(c));
        }
    }

    #[test]
    fn none_has_no_command() {
        assert!(Compression::None.command().is_none());
    }
}
