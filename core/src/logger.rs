// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use log::debug;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use crate::cli::LogLevel;

pub fn get_logger_pattern() -> PatternEncoder {
    PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} - {l} - {m}\n")
}

/// Console logging, plus a file appender when `log_file` is given.
pub fn build_logger_config(log_level: LogLevel, log_file: Option<PathBuf>) -> anyhow::Result<Config> {
    let console_appender = ConsoleAppender::builder()
        .encoder(Box::new(get_logger_pattern()))
        .build();

    let mut config_builder = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console_appender)));
    let mut root_builder = Root::builder().appender("console");

    if let Some(log_file) = log_file {
        let file_appender = FileAppender::builder()
            .encoder(Box::new(get_logger_pattern()))
            .build(log_file)?;
        config_builder = config_builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root_builder = root_builder.appender("file");
    }

    Ok(config_builder.build(root_builder.build(log_level.to_level_filter()))?)
}

pub fn init_logger(log_level: LogLevel, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = build_logger_config(log_level, log_file)?;
    log4rs::init_config(config)?;
    debug!("Logger initialized with level: {}", log_level);
    Ok(())
}
