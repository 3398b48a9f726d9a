//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ldpd_utils::config::Config;

// Loads and validates the configuration file.
//
// Command-line macros of the form `name=value` are substituted for
// `${name}` occurrences before parsing.
pub(crate) fn load(path: &str, macros: &[&str]) -> Result<Config, String> {
    let mut contents = std::fs::read_to_string(path)
        .map_err(|error| format!("{}: {}", path, error))?;

    for define in macros {
        let Some((name, value)) = define.split_once('=') else {
            return Err(format!("invalid macro definition: {}", define));
        };
        contents = contents.replace(&format!("${{{}}}", name), value);
    }

    let config: Config = toml::from_str(&contents)
        .map_err(|error| format!("{}: {}", path, error))?;
    config
        .validate()
        .map_err(|error| format!("{}: {}", path, error))?;

    Ok(config)
}
