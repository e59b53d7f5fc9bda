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

    pidrive_config::bpaf_config::mod.rs

    Command line arguments, parsed with bpaf.
*/

use std::path::PathBuf;

use bpaf::Bpaf;

#[cfg_attr(feature = "use_bpaf", derive(Bpaf))]
#[cfg_attr(feature = "use_bpaf", bpaf(options, version, generate(cli_args)))]
#[derive(Debug, Default)]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    #[bpaf(long("base_dir"), long("basedir"))]
    pub base_dir: Option<PathBuf>,

    /// Bus trace to replay against the drive
    #[bpaf(long("trace"))]
    pub trace: Option<PathBuf>,

    /// Serial bus device number, 8-11
    #[bpaf(long("device_number"), long("device"))]
    pub device_number: Option<u8>,

    /// D81 image to insert at startup
    #[bpaf(long("image"))]
    pub image: Option<PathBuf>,

    /// 1581 ROM image
    #[bpaf(long("rom"))]
    pub rom: Option<PathBuf>,

    /// Stop after this many drive cycles
    #[bpaf(long("max_cycles"))]
    pub max_cycles: Option<u64>,

    #[bpaf(long("write_protect"), switch)]
    pub write_protect: bool,
}
