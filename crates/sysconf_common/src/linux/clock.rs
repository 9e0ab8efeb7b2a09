//! Wall clock and timezone link.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, Utc};
use nix::sys::time::TimeSpec;
use nix::time::{clock_settime, ClockId};
use sysinfo::System;

use sysconf_shared::{OsError, OsErrorKind};

use super::{nix_err, LinuxHost};
use crate::adapter::ClockOps;

impl LinuxHost {
    fn zone_target(&self, zone: &str) -> PathBuf {
        if Path::new(zone).is_absolute() {
            PathBuf::from(zone)
        } else {
            self.paths.zoneinfo.join(zone)
        }
    }

    /// Where a copied zone file is kept once the link replaces it.
    fn localtime_copy(&self) -> PathBuf {
        let link = &self.paths.localtime;
        let name = link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        link.with_file_name(format!(".{}.sysconf-orig", name))
    }

    fn localtime_is_copy(&self) -> bool {
        fs::symlink_metadata(&self.paths.localtime)
            .map(|meta| meta.file_type().is_file())
            .unwrap_or(false)
    }

    /// Put the saved zone file back in place of the link.
    fn restore_localtime_copy(&self) -> Result<(), OsError> {
        let link = &self.paths.localtime;
        if self.localtime_is_copy() {
            return Ok(());
        }
        let copy = self.localtime_copy();
        if !copy.is_file() {
            return Err(OsError::new(
                OsErrorKind::InvalidValue,
                link.display().to_string(),
                "no saved zone file to restore",
            ));
        }
        fs::rename(&copy, link).map_err(|e| OsError::from_io(link.display().to_string(), &e))
    }
}

impl ClockOps for LinuxHost {
    fn current_datetime(&self) -> Result<DateTime<FixedOffset>, OsError> {
        Ok(Local::now().fixed_offset())
    }

    fn set_current_datetime(&self, at: DateTime<Utc>) -> Result<(), OsError> {
        let spec = TimeSpec::new(at.timestamp(), i64::from(at.timestamp_subsec_nanos()));
        clock_settime(ClockId::CLOCK_REALTIME, spec).map_err(|e| nix_err("realtime clock", e))
    }

    fn boot_datetime(&self) -> Result<DateTime<FixedOffset>, OsError> {
        let secs = i64::try_from(System::boot_time())
            .map_err(|_| OsError::invalid("boot time", "out of range"))?;
        let boot = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| OsError::invalid("boot time", "out of range"))?;
        Ok(boot.with_timezone(&Local).fixed_offset())
    }

    fn timezone(&self) -> Result<Option<String>, OsError> {
        let link = &self.paths.localtime;
        let target = match fs::read_link(link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            // A copied zone file rather than a link; reported by its own path.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                return Ok(Some(link.display().to_string()))
            }
            Err(e) => return Err(OsError::from_io(link.display().to_string(), &e)),
        };
        let absolute = if target.is_relative() {
            link.parent().map(|p| p.join(&target)).unwrap_or(target)
        } else {
            target
        };
        let zoneinfo = fs::canonicalize(&self.paths.zoneinfo).unwrap_or(self.paths.zoneinfo.clone());
        let resolved = fs::canonicalize(&absolute).unwrap_or(absolute.clone());
        for base in [&self.paths.zoneinfo, &zoneinfo] {
            if let Ok(rest) = absolute.strip_prefix(base).or_else(|_| resolved.strip_prefix(base)) {
                return Ok(Some(rest.to_string_lossy().into_owned()));
            }
        }
        Ok(Some(absolute.to_string_lossy().into_owned()))
    }

    fn set_timezone(&self, zone: Option<&str>) -> Result<(), OsError> {
        let link = &self.paths.localtime;
        let Some(zone) = zone else {
            return match fs::remove_file(link) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(OsError::from_io(link.display().to_string(), &e)),
            };
        };

        let target = self.zone_target(zone);
        if target == *link {
            return self.restore_localtime_copy();
        }
        if !target.is_file() {
            return Err(OsError::new(
                OsErrorKind::InvalidValue,
                target.display().to_string(),
                format!("unknown timezone '{}'", zone),
            ));
        }
        let name = link
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = link.with_file_name(format!(".{}.sysconf-tmp", name));
        let _ = fs::remove_file(&tmp);
        symlink(&target, &tmp).map_err(|e| OsError::from_io(tmp.display().to_string(), &e))?;

        let copy = self.localtime_copy();
        let saved = self.localtime_is_copy();
        if saved {
            if let Err(e) = fs::rename(link, &copy) {
                let _ = fs::remove_file(&tmp);
                return Err(OsError::from_io(link.display().to_string(), &e));
            }
        }
        fs::rename(&tmp, link).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            if saved {
                let _ = fs::rename(&copy, link);
            }
            OsError::from_io(link.display().to_string(), &e)
        })
    }
}
