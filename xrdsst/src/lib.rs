// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

/*!
# xrdsst

The X-Road Security Server Toolkit configures one or more [X-Road][1] security servers from a
single declarative YAML document by driving each server's administrative REST API.

Every operation is a convergence step: the toolkit first reads the server's current state for an
entity (a client subsystem, a service description, a certificate, ...) and then issues at most one
mutating call to move it to the configured state. Running the same operation twice is safe; the
second run finds everything in place and issues no mutating calls at all.

## Components

* [`config`] - the configuration document and its validation.
* [`context`] - the per-run context: one [`context::Target`] per configured server, with the
  resolved API credentials.
* [`api`] - a typed client for the subset of the admin API the toolkit consumes.
* [`probe`] - read-only lookups that match remote entities by their natural key.
* [`converge`] - the per-entity convergence policies and the batch orchestrator.
* [`report`] - the ordered outcome records and their table and structured renderings.

A failure while converging one entity never aborts the batch: it is recorded, that entity's
remaining steps are abandoned, and its siblings are processed as usual.

## Crate features

* **cli** -
  Include the `xrdsst` command-line interface. This is a default feature.

[1]: https://x-road.global/
*/

pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod converge;
pub mod error;
pub mod probe;
pub mod report;
