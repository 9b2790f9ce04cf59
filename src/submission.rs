//! Ordering of the per-frame queue submissions.
//!
//! A frame is split into stages, each one a queue submission. Stages are
//! chained with semaphores only; the host never waits between them.

use ash::vk;

#[derive(thiserror::Error, Debug)]
pub enum SequenceError {
    #[error("Submission sequence has no stages")]
    Empty,
    #[error("Stage {stage} waits on {semaphore:?}, which no earlier stage signals")]
    WaitBeforeSignal {
        stage: &'static str,
        semaphore: vk::Semaphore,
    },
    #[error("Stage {stage} signals {semaphore:?}, which is already signaled in this frame")]
    DuplicateSignal {
        stage: &'static str,
        semaphore: vk::Semaphore,
    },
    #[error("Submitting stage {stage} failed: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags,
}

/// One queue submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStage {
    pub name: &'static str,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,
}

impl SubmissionStage {
    pub fn new(name: &'static str, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            name,
            command_buffers: vec![command_buffer],
            waits: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(SemaphoreWait { semaphore, stage });
        self
    }

    pub fn signal(mut self, semaphore: vk::Semaphore) -> Self {
        self.signals.push(semaphore);
        self
    }
}

/// Semaphores owned by one frame in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSemaphores {
    /// Signaled by the swapchain when the image is ready.
    pub image_available: vk::Semaphore,
    pub conversion_done: vk::Semaphore,
    pub prepare_done: vk::Semaphore,
    /// Waited on by present.
    pub render_complete: vk::Semaphore,
}

/// Command buffers recorded for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCommands {
    pub conversion: vk::CommandBuffer,
    pub prepare: vk::CommandBuffer,
    /// Generate dispatch and present draw, submitted on their own when set.
    pub generate: Option<vk::CommandBuffer>,
}

impl FrameCommands {
    /// Buffer that receives the generate dispatch and the present draw.
    pub fn generate_target(&self) -> vk::CommandBuffer {
        self.generate.unwrap_or(self.prepare)
    }

    pub fn all(&self) -> impl Iterator<Item = vk::CommandBuffer> {
        [Some(self.conversion), Some(self.prepare), self.generate]
            .into_iter()
            .flatten()
    }
}

/// Ordered stages for one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionSequence {
    external: Vec<vk::Semaphore>,
    stages: Vec<SubmissionStage>,
}

impl SubmissionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the frame layout:
    /// conversion → `conversion_done` → prepare → `render_complete`, or with
    /// a separate generate buffer
    /// conversion → prepare → `prepare_done` → generate → `render_complete`.
    ///
    /// The stage that draws into the swapchain image waits on the acquire.
    pub fn for_frame(commands: &FrameCommands, semaphores: &FrameSemaphores) -> Self {
        let conversion = SubmissionStage::new("conversion", commands.conversion)
            .signal(semaphores.conversion_done);

        let prepare = SubmissionStage::new("prepare", commands.prepare).wait(
            semaphores.conversion_done,
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        );

        let image_stage =
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER;

        let sequence = Self::new()
            .external(semaphores.image_available)
            .stage(conversion);

        match commands.generate {
            None => sequence.stage(
                prepare
                    .wait(semaphores.image_available, image_stage)
                    .signal(semaphores.render_complete),
            ),
            Some(generate) => sequence
                .stage(prepare.signal(semaphores.prepare_done))
                .stage(
                    SubmissionStage::new("generate", generate)
                        .wait(semaphores.prepare_done, vk::PipelineStageFlags::TRANSFER)
                        .wait(semaphores.image_available, image_stage)
                        .signal(semaphores.render_complete),
                ),
        }
    }

    /// Declares a semaphore signaled outside the sequence.
    pub fn external(mut self, semaphore: vk::Semaphore) -> Self {
        self.external.push(semaphore);
        self
    }

    pub fn stage(mut self, stage: SubmissionStage) -> Self {
        self.stages.push(stage);
        self
    }

    #[inline]
    pub fn stages(&self) -> &[SubmissionStage] {
        &self.stages
    }

    /// Semaphores the last stage signals, for present to wait on.
    pub fn final_signals(&self) -> &[vk::Semaphore] {
        self.stages
            .last()
            .map(|stage| stage.signals.as_slice())
            .unwrap_or(&[])
    }

    /// Checks that every wait follows its signal and that no semaphore is
    /// signaled twice.
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.stages.is_empty() {
            return Err(SequenceError::Empty);
        }

        let mut signaled: Vec<vk::Semaphore> = Vec::new();

        for stage in &self.stages {
            for wait in &stage.waits {
                if !signaled.contains(&wait.semaphore) && !self.external.contains(&wait.semaphore)
                {
                    return Err(SequenceError::WaitBeforeSignal {
                        stage: stage.name,
                        semaphore: wait.semaphore,
                    });
                }
            }

            for semaphore in &stage.signals {
                if signaled.contains(semaphore) || self.external.contains(semaphore) {
                    return Err(SequenceError::DuplicateSignal {
                        stage: stage.name,
                        semaphore: *semaphore,
                    });
                }

                signaled.push(*semaphore);
            }
        }

        Ok(())
    }
}

/// A queue that accepts one stage at a time.
pub trait QueueSubmitter {
    fn submit_stage(&self, stage: &SubmissionStage, fence: vk::Fence) -> Result<(), SequenceError>;

    /// Validates and submits every stage in order. Only the last stage
    /// carries `fence`.
    fn submit_sequence(
        &self,
        sequence: &SubmissionSequence,
        fence: vk::Fence,
    ) -> Result<(), SequenceError> {
        sequence.validate()?;

        let last = sequence.stages().len() - 1;

        for (i, stage) in sequence.stages().iter().enumerate() {
            let stage_fence = if i == last { fence } else { vk::Fence::null() };

            log::trace!("Submitting stage {}", stage.name);

            self.submit_stage(stage, stage_fence)?;
        }

        Ok(())
    }
}
