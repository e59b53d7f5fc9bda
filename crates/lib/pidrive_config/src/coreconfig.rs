/*
    PiDrive

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    pidrive_config::coreconfig.rs

    Implements the CoreConfig trait for the TOML + bpaf configuration.
*/

use std::path::PathBuf;

use crate::ConfigFileParams;

use pidrive_core::{
    coreconfig::CoreConfig,
    drive_config::{DriveConfiguration, InputConfiguration, KernelConfiguration},
};

impl CoreConfig for ConfigFileParams {
    fn get_base_dir(&self) -> PathBuf {
        self.emulator.basedir.clone()
    }
    fn get_drive_config(&self) -> &DriveConfiguration {
        &self.drive
    }
    fn get_kernel_config(&self) -> &KernelConfiguration {
        &self.kernel
    }
    fn get_input_config(&self) -> &InputConfiguration {
        &self.input
    }
    fn get_trace_file(&self) -> Option<PathBuf> {
        self.headless.trace.clone()
    }
    fn get_max_cycles(&self) -> Option<u64> {
        self.headless.max_cycles
    }
}
